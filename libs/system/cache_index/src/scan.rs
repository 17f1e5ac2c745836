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
use crate::{CacheRecord, TIMESTAMP_FORMAT};
use chrono::{DateTime, Local};
use log::debug;
use rayon::prelude::*;
use regex::Regex;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tile_grid::{SizeId, TileId};

/// Indexed filenames are the seven digit tile id plus a known extension.
fn filename_pattern() -> Regex {
    Regex::new(r"^(\d{7})\.(dds|png)$").expect("static regex")
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out);
        } else {
            out.push(path);
        }
    }
}

/// Check that a tile file actually lives where its id says it should;
/// anything misfiled is left out of the index rather than trusted.
fn placed_consistently(path: &Path, id: TileId) -> bool {
    let coords = id.unpack();
    let dir1 = path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str());
    let dir10 = path
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str());
    dir1 == Some(coords.dir1.as_str()) && dir10 == Some(coords.dir10.as_str())
}

/// Probe one candidate file; None when it is not an indexable tile.
pub(crate) fn probe_file(path: &Path) -> Option<(String, CacheRecord)> {
    let name = path.file_name()?.to_str()?;
    let pattern = filename_pattern();
    let caps = pattern.captures(name)?;
    let id = TileId::from_raw(caps[1].parse().ok()?);
    if !placed_consistently(path, id) {
        debug!("skipping misfiled tile {}", path.display());
        return None;
    }

    let meta = fs::metadata(path).ok()?;
    let (width, height) = match &caps[2] {
        "dds" => {
            let hdr = dxt1::read_header(path).ok()?;
            (hdr.width, hdr.height)
        }
        _ => dxt1::png::probe_file(path).ok()?,
    };
    let modified: DateTime<Local> = meta.modified().ok()?.into();
    Some((
        path.display().to_string(),
        CacheRecord {
            id: id.raw(),
            size: meta.len(),
            last_modified: modified.format(TIMESTAMP_FORMAT).to_string(),
            size_id: SizeId::from_width_px(width).raw(),
            width,
            height,
        },
    ))
}

/// Scan the given roots in parallel and build a fresh record table.
pub(crate) fn scan_roots(roots: &[&Path]) -> BTreeMap<String, CacheRecord> {
    let mut candidates = Vec::new();
    for root in roots {
        walk(root, &mut candidates);
    }
    candidates
        .par_iter()
        .filter_map(|p| probe_file(p))
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use tile_grid::TileMetadata;

    fn write_tile(root: &Path, lon: f64, lat: f64, size_id: u8) -> PathBuf {
        let meta =
            TileMetadata::discover(lon, lat, SizeId::new(size_id).unwrap()).unwrap();
        let dir = root.join(&meta.dir10).join(&meta.dir1);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.dds", meta.id));
        let img = RgbaImage::from_pixel(meta.width_px.min(64), 64, image::Rgba([1, 2, 3, 255]));
        dxt1::convert_image(&img, &path).unwrap();
        path
    }

    #[test]
    fn test_scan_finds_well_placed_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tile(dir.path(), 11.31, 47.25, 0);
        let found = scan_roots(&[dir.path()]);
        assert_eq!(found.len(), 1);
        let record = &found[&path.display().to_string()];
        assert_eq!(record.width, 64);
        assert_eq!(record.size_id, 0);
    }

    #[test]
    fn test_scan_skips_misfiled_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_tile(dir.path(), 11.31, 47.25, 0);
        // Copy the same file under a directory it does not belong to.
        let bad_dir = dir.path().join("e020n40").join("e021n47");
        fs::create_dir_all(&bad_dir).unwrap();
        let bad = bad_dir.join(good.file_name().unwrap());
        fs::copy(&good, &bad).unwrap();

        let found = scan_roots(&[dir.path()]);
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&good.display().to_string()));
    }

    #[test]
    fn test_scan_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), b"not a tile").unwrap();
        fs::write(dir.path().join("1234567.jpg"), b"wrong extension").unwrap();
        assert!(scan_roots(&[dir.path()]).is_empty());
    }
}
