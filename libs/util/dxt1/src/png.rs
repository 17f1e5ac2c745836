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

//! Structural PNG checks. These look only at the signature and the IHDR
//! chunk, which is enough to reject the error pages and truncated bodies
//! that map servers hand out, without paying for a full decode.

use anyhow::{ensure, Result};
use std::{fs::File, io::Read, path::Path};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

const PROBE_LEN: usize = 33; // signature + IHDR length/tag/payload

/// True iff the buffer starts with the PNG signature followed by a
/// well-formed IHDR chunk of length 13.
pub fn is_structurally_png(buf: &[u8]) -> bool {
    if buf.len() < 24 {
        return false;
    }
    if buf[0..8] != PNG_SIGNATURE {
        return false;
    }
    let ihdr_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    ihdr_len == 13 && &buf[12..16] == b"IHDR"
}

/// Width and height from the IHDR chunk.
pub fn dimensions(buf: &[u8]) -> Result<(u32, u32)> {
    ensure!(buf.len() >= 24, "png too short for IHDR");
    ensure!(is_structurally_png(buf), "not a png");
    let w = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
    let h = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
    ensure!(w > 0 && h > 0, "degenerate png dimensions {}x{}", w, h);
    Ok((w, h))
}

pub fn probe_file(path: &Path) -> Result<(u32, u32)> {
    let mut head = [0u8; PROBE_LEN];
    let mut fp = File::open(path)?;
    let n = fp.read(&mut head)?;
    dimensions(&head[..n])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_png(w: u32, h: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&PNG_SIGNATURE);
        buf.extend_from_slice(&13u32.to_be_bytes());
        buf.extend_from_slice(b"IHDR");
        buf.extend_from_slice(&w.to_be_bytes());
        buf.extend_from_slice(&h.to_be_bytes());
        buf.extend_from_slice(&[8, 2, 0, 0, 0]); // depth, color, etc.
        buf
    }

    #[test]
    fn test_accepts_minimal_ihdr() {
        let buf = fake_png(512, 256);
        assert!(is_structurally_png(&buf));
        assert_eq!(dimensions(&buf).unwrap(), (512, 256));
    }

    #[test]
    fn test_rejects_html_error_page() {
        assert!(!is_structurally_png(b"<html><body>404 Not Found</body></html>"));
    }

    #[test]
    fn test_rejects_wrong_ihdr_length() {
        let mut buf = fake_png(512, 256);
        buf[8..12].copy_from_slice(&14u32.to_be_bytes());
        assert!(!is_structurally_png(&buf));
    }

    #[test]
    fn test_rejects_truncated() {
        let buf = fake_png(512, 256);
        assert!(!is_structurally_png(&buf[..10]));
    }
}
