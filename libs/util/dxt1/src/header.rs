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
use anyhow::{bail, ensure, Result};

/// Total header length, magic included.
pub const HEADER_LEN: usize = 128;

const DDS_MAGIC: &[u8; 4] = b"DDS ";
const FOURCC_DXT1: &[u8; 4] = b"DXT1";

// DDSD_CAPS | DDSD_HEIGHT | DDSD_WIDTH | DDSD_PIXELFORMAT | DDSD_LINEARSIZE
const HEADER_FLAGS: u32 = 0x1 | 0x2 | 0x4 | 0x1000 | 0x0008_0000;
const PF_FLAG_FOURCC: u32 = 0x4;
const CAPS_TEXTURE: u32 = 0x1000;

/// The fixed-layout DDS file header for a mipless DXT1 surface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DdsHeader {
    pub width: u32,
    pub height: u32,
}

impl DdsHeader {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Byte length of the block data that must follow this header.
    pub fn data_len(&self) -> usize {
        (self.width as usize / 4) * (self.height as usize / 4) * 8
    }

    pub fn expected_file_len(&self) -> usize {
        HEADER_LEN + self.data_len()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        fn put(out: &mut Vec<u8>, v: u32) {
            out.extend_from_slice(&v.to_le_bytes());
        }
        let start = out.len();
        out.extend_from_slice(DDS_MAGIC);
        put(out, 124); // header size sans magic
        put(out, HEADER_FLAGS);
        put(out, self.height);
        put(out, self.width);
        put(out, (self.width / 4).max(1) * (self.height / 4).max(1) * 8); // linear size
        put(out, 0); // depth
        put(out, 0); // mipmap count
        for _ in 0..11 {
            put(out, 0); // reserved
        }
        put(out, 32); // pixel format size
        put(out, PF_FLAG_FOURCC);
        out.extend_from_slice(FOURCC_DXT1);
        for _ in 0..5 {
            put(out, 0); // rgb bit count and channel masks, unused with a fourcc
        }
        put(out, CAPS_TEXTURE);
        put(out, 0); // caps2
        put(out, 0); // caps3
        put(out, 0); // caps4
        put(out, 0); // reserved2
        debug_assert_eq!(out.len() - start, HEADER_LEN);
    }

    pub fn read_from(buf: &[u8]) -> Result<Self> {
        ensure!(buf.len() >= HEADER_LEN, "dds header truncated: {} bytes", buf.len());
        ensure!(&buf[0..4] == DDS_MAGIC, "bad dds magic");
        let word = |off: usize| u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        ensure!(word(4) == 124, "bad dds header size {}", word(4));
        let height = word(12);
        let width = word(16);
        if &buf[84..88] != FOURCC_DXT1 {
            bail!("not a DXT1 surface");
        }
        ensure!(width % 4 == 0 && height % 4 == 0, "dimensions {}x{} not block aligned", width, height);
        ensure!(width > 0 && height > 0, "degenerate dimensions");
        Ok(Self { width, height })
    }
}
