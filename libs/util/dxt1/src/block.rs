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

//! One 4x4 DXT1 block: two RGB565 endpoints and sixteen 2-bit selectors,
//! packed little-endian into eight bytes.

pub const BLOCK_BYTES: usize = 8;
pub const BLOCK_DIM: usize = 4;
pub const BLOCK_PIXELS: usize = 16;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Rgb(pub u8, pub u8, pub u8);

fn to_565(c: Rgb) -> u16 {
    (((c.0 as u16) >> 3) << 11) | (((c.1 as u16) >> 2) << 5) | ((c.2 as u16) >> 3)
}

fn from_565(v: u16) -> Rgb {
    let r5 = ((v >> 11) & 0x1f) as u8;
    let g6 = ((v >> 5) & 0x3f) as u8;
    let b5 = (v & 0x1f) as u8;
    // Replicate high bits into the low bits so white stays white.
    Rgb((r5 << 3) | (r5 >> 2), (g6 << 2) | (g6 >> 4), (b5 << 3) | (b5 >> 2))
}

fn lerp3(a: u8, b: u8, num: u16, den: u16) -> u8 {
    (((a as u16) * (den - num) + (b as u16) * num) / den) as u8
}

/// Palette for the opaque mode (c0 > c1): two endpoints and two interior
/// thirds. The 1-bit-alpha mode (c0 <= c1) replaces the last entry with
/// transparent black and uses the midpoint.
fn palette(c0: u16, c1: u16) -> ([Rgb; 4], bool) {
    let a = from_565(c0);
    let b = from_565(c1);
    if c0 > c1 {
        (
            [
                a,
                b,
                Rgb(lerp3(a.0, b.0, 1, 3), lerp3(a.1, b.1, 1, 3), lerp3(a.2, b.2, 1, 3)),
                Rgb(lerp3(a.0, b.0, 2, 3), lerp3(a.1, b.1, 2, 3), lerp3(a.2, b.2, 2, 3)),
            ],
            false,
        )
    } else {
        (
            [
                a,
                b,
                Rgb(lerp3(a.0, b.0, 1, 2), lerp3(a.1, b.1, 1, 2), lerp3(a.2, b.2, 1, 2)),
                Rgb(0, 0, 0),
            ],
            true,
        )
    }
}

fn dist2(a: Rgb, b: Rgb) -> u32 {
    let dr = a.0 as i32 - b.0 as i32;
    let dg = a.1 as i32 - b.1 as i32;
    let db = a.2 as i32 - b.2 as i32;
    (dr * dr + dg * dg + db * db) as u32
}

/// Encode sixteen row-major pixels into one block.
pub fn encode_block(pixels: &[Rgb; BLOCK_PIXELS]) -> [u8; BLOCK_BYTES] {
    // Endpoints from the extremes along the block's principal luminance
    // axis; a cheap stand-in for a full PCA that behaves identically on
    // the flat and two-tone blocks orthophotos are made of.
    let lum = |c: Rgb| c.0 as u32 * 54 + c.1 as u32 * 183 + c.2 as u32 * 19;
    let mut lo = pixels[0];
    let mut hi = pixels[0];
    for &p in pixels.iter() {
        if lum(p) < lum(lo) {
            lo = p;
        }
        if lum(p) > lum(hi) {
            hi = p;
        }
    }

    let mut c0 = to_565(hi);
    let mut c1 = to_565(lo);
    if c0 < c1 {
        std::mem::swap(&mut c0, &mut c1);
    }
    if c0 == c1 {
        // Flat block: every selector points at c0. Keeping c0 > c1 is not
        // possible, so emit the equal pair which selects the opaque-ish
        // half palette; index 0 decodes to the exact endpoint either way.
        let mut out = [0u8; BLOCK_BYTES];
        out[0..2].copy_from_slice(&c0.to_le_bytes());
        out[2..4].copy_from_slice(&c1.to_le_bytes());
        return out;
    }

    let (pal, _) = palette(c0, c1);
    let mut indices: u32 = 0;
    for (i, &p) in pixels.iter().enumerate() {
        let mut best = 0u32;
        let mut best_d = u32::MAX;
        // Opaque encoding never selects the transparent slot.
        for (j, &q) in pal.iter().enumerate() {
            let d = dist2(p, q);
            if d < best_d {
                best_d = d;
                best = j as u32;
            }
        }
        indices |= best << (2 * i);
    }

    let mut out = [0u8; BLOCK_BYTES];
    out[0..2].copy_from_slice(&c0.to_le_bytes());
    out[2..4].copy_from_slice(&c1.to_le_bytes());
    out[4..8].copy_from_slice(&indices.to_le_bytes());
    out
}

/// Decode one block into sixteen row-major (color, opaque) pairs.
pub fn decode_block(block: &[u8; BLOCK_BYTES]) -> [(Rgb, bool); BLOCK_PIXELS] {
    let c0 = u16::from_le_bytes([block[0], block[1]]);
    let c1 = u16::from_le_bytes([block[2], block[3]]);
    let indices = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
    let (pal, punch_through) = palette(c0, c1);

    let mut out = [(Rgb(0, 0, 0), true); BLOCK_PIXELS];
    for (i, slot) in out.iter_mut().enumerate() {
        let sel = ((indices >> (2 * i)) & 0x3) as usize;
        let opaque = !(punch_through && sel == 3);
        *slot = (pal[sel], opaque);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_block_is_exact_for_565_colors() {
        // A color on the 565 lattice survives encoding untouched.
        let c = from_565(to_565(Rgb(96, 128, 160)));
        let pixels = [c; BLOCK_PIXELS];
        let block = encode_block(&pixels);
        for (got, opaque) in decode_block(&block).iter() {
            assert!(opaque);
            assert_eq!(*got, c);
        }
    }

    #[test]
    fn test_two_tone_block() {
        let dark = Rgb(8, 8, 8);
        let lite = Rgb(248, 248, 248);
        let mut pixels = [dark; BLOCK_PIXELS];
        for i in 0..8 {
            pixels[i] = lite;
        }
        let decoded = decode_block(&encode_block(&pixels));
        for i in 0..BLOCK_PIXELS {
            let want = pixels[i];
            let (got, opaque) = decoded[i];
            assert!(opaque);
            assert!(dist2(want, got) < 64, "pixel {} drifted: {:?} -> {:?}", i, want, got);
        }
    }

    #[test]
    fn test_selector_packing_is_row_major_le() {
        // First pixel's selector occupies the low two bits of byte 4.
        let mut pixels = [Rgb(0, 0, 0); BLOCK_PIXELS];
        pixels[0] = Rgb(255, 255, 255);
        let block = encode_block(&pixels);
        let c0 = u16::from_le_bytes([block[0], block[1]]);
        // c0 is the white endpoint, so pixel 0 must select index 0.
        assert_eq!(from_565(c0), Rgb(255, 255, 255));
        assert_eq!(block[4] & 0x3, 0);
        // The remaining black pixels select endpoint c1 (index 1).
        assert_eq!((block[4] >> 2) & 0x3, 1);
    }

    #[test]
    fn test_gradient_error_bounded_by_palette_quantization() {
        let mut pixels = [Rgb(0, 0, 0); BLOCK_PIXELS];
        for (i, p) in pixels.iter_mut().enumerate() {
            let v = (i * 255 / 15) as u8;
            *p = Rgb(v, v, v);
        }
        let decoded = decode_block(&encode_block(&pixels));
        for i in 0..BLOCK_PIXELS {
            // Four palette entries across 0..255: worst case error is half
            // the inter-entry spacing plus 565 rounding.
            let err = (pixels[i].0 as i32 - (decoded[i].0).0 as i32).abs();
            assert!(err <= 48, "pixel {} error {}", i, err);
        }
    }
}
