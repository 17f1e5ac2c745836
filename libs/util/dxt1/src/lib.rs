// This file is part of Orthos.
//
// Orthos is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Orthos is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Orthos.  If not, see <http://www.gnu.org/licenses/>.

//! The DXT1/DDS texture codec the scenery pipeline emits and reads back.
//! The layout is a 128 byte header followed by 8 byte blocks for every
//! 4x4 pixel tile, row-major over blocks, little-endian endpoints.

mod block;
mod header;
pub mod png;

pub use block::{decode_block, encode_block, Rgb, BLOCK_BYTES, BLOCK_DIM};
pub use header::{DdsHeader, HEADER_LEN};

use anyhow::{ensure, Context, Result};
use image::RgbaImage;
use std::{fs, path::Path};

/// Encode an image into a complete DDS byte stream.
pub fn encode(img: &RgbaImage) -> Result<Vec<u8>> {
    let (w, h) = img.dimensions();
    ensure!(
        w % 4 == 0 && h % 4 == 0 && w > 0 && h > 0,
        "image {}x{} is not 4x4 block aligned",
        w,
        h
    );
    let header = DdsHeader::new(w, h);
    let mut out = Vec::with_capacity(header.expected_file_len());
    header.write_to(&mut out);

    let mut pixels = [Rgb(0, 0, 0); 16];
    for by in 0..(h / 4) {
        for bx in 0..(w / 4) {
            for py in 0..4u32 {
                for px in 0..4u32 {
                    let p = img.get_pixel(bx * 4 + px, by * 4 + py);
                    pixels[(py * 4 + px) as usize] = Rgb(p[0], p[1], p[2]);
                }
            }
            out.extend_from_slice(&encode_block(&pixels));
        }
    }
    debug_assert_eq!(out.len(), header.expected_file_len());
    Ok(out)
}

/// Decode a complete DDS byte stream back into an RGBA image.
pub fn decode(buf: &[u8]) -> Result<RgbaImage> {
    let header = DdsHeader::read_from(buf)?;
    ensure!(
        buf.len() == header.expected_file_len(),
        "dds length {} does not match {}x{} surface ({} expected)",
        buf.len(),
        header.width,
        header.height,
        header.expected_file_len()
    );
    let mut img = RgbaImage::new(header.width, header.height);
    let mut off = HEADER_LEN;
    for by in 0..(header.height / 4) {
        for bx in 0..(header.width / 4) {
            let mut block = [0u8; BLOCK_BYTES];
            block.copy_from_slice(&buf[off..off + BLOCK_BYTES]);
            off += BLOCK_BYTES;
            let texels = decode_block(&block);
            for py in 0..4u32 {
                for px in 0..4u32 {
                    let (c, opaque) = texels[(py * 4 + px) as usize];
                    let a = if opaque { 255 } else { 0 };
                    img.put_pixel(bx * 4 + px, by * 4 + py, image::Rgba([c.0, c.1, c.2, a]));
                }
            }
        }
    }
    Ok(img)
}

pub fn decode_file(path: &Path) -> Result<RgbaImage> {
    let buf = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    decode(&buf)
}

/// Header metadata without touching the block data.
pub fn read_header(path: &Path) -> Result<DdsHeader> {
    use std::io::Read;
    let mut head = [0u8; HEADER_LEN];
    let mut fp = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    fp.read_exact(&mut head)
        .with_context(|| format!("{} too short for a dds", path.display()))?;
    DdsHeader::read_from(&head)
}

/// Structural validation: magic, DXT1 fourcc, and the exact byte length
/// implied by the recorded dimensions.
pub fn validate_file(path: &Path) -> bool {
    let len = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return false,
    };
    match read_header(path) {
        Ok(h) => len == h.expected_file_len() as u64,
        Err(_) => false,
    }
}

/// Transcode a PNG file into a DDS file.
pub fn convert_png(png_path: &Path, dds_path: &Path) -> Result<()> {
    let img = image::open(png_path)
        .with_context(|| format!("decoding {}", png_path.display()))?
        .to_rgba8();
    convert_image(&img, dds_path)
}

/// Encode an in-memory image and write it out.
pub fn convert_image(img: &RgbaImage, dds_path: &Path) -> Result<()> {
    let bytes = encode(img)?;
    fs::write(dds_path, &bytes).with_context(|| format!("writing {}", dds_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn test_encoded_length_is_exact() {
        let dds = encode(&checker(512, 512)).unwrap();
        assert_eq!(dds.len(), 128 + (512 / 4) * (512 / 4) * 8);
    }

    #[test]
    fn test_round_trip_within_quantization_error() {
        let img = checker(64, 32);
        let back = decode(&encode(&img).unwrap()).unwrap();
        assert_eq!(back.dimensions(), (64, 32));
        // Block-aligned checkers quantize exactly.
        for (a, b) in img.pixels().zip(back.pixels()) {
            assert_eq!(a[0], b[0]);
            assert_eq!(a[1], b[1]);
            assert_eq!(a[2], b[2]);
            assert_eq!(b[3], 255);
        }
    }

    #[test]
    fn test_validate_and_length_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.dds");
        convert_image(&checker(64, 64), &path).unwrap();
        assert!(validate_file(&path));

        // A truncated file fails validation and decode.
        let mut bytes = fs::read(&path).unwrap();
        bytes.pop();
        fs::write(&path, &bytes).unwrap();
        assert!(!validate_file(&path));
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_rejects_unaligned_input() {
        assert!(encode(&checker(30, 30)).is_err());
    }

    #[test]
    fn test_header_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.dds");
        convert_image(&checker(128, 64), &path).unwrap();
        let hdr = read_header(&path).unwrap();
        assert_eq!((hdr.width, hdr.height), (128, 64));
    }
}
