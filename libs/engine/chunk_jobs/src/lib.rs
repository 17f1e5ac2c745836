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

//! Chunk descriptors: the unit of download work. A tile is split into a
//! cols x cols grid of chunks whose bboxes partition the tile exactly;
//! each descriptor carries everything a worker needs to fetch and stage
//! one chunk.

use anyhow::Result;
use log::debug;
use std::path::{Path, PathBuf};
use tile_grid::{BBox, SizeId, TileMetadata};

/// Minimum byte size at which an existing staging file counts as done.
pub const MIN_CHUNK_BYTES: u64 = 1024;
/// Pre-coverage chunks are tiny; accept much smaller files.
pub const MIN_PRECOVER_BYTES: u64 = 64;

/// One downloadable chunk of a tile.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkJob {
    pub tile_id: u32,
    pub size_id: SizeId,
    /// One-based chunk coordinates; y counts from the tile's south edge.
    pub x: u32,
    pub y: u32,
    pub bbox: BBox,
    pub width_px: u32,
    pub height_px: u32,
    pub staging_path: PathBuf,
    pub retries_left: u32,
    pub attempts: u32,
}

impl ChunkJob {
    pub fn attempt_index(&self) -> u32 {
        self.attempts - self.retries_left
    }
}

/// Result of planning a tile: fresh jobs plus the number of chunks that
/// were already staged and only need counting.
#[derive(Debug, Default)]
pub struct PlannedTile {
    pub jobs: Vec<ChunkJob>,
    pub already_staged: u32,
}

fn chunk_pixel_height(width_px: u32, bbox: &BBox) -> u32 {
    (width_px as f64 * (bbox.height() / bbox.width()).abs()).round() as u32
}

/// Staging filename: `{id}_{size_id}_{total}_{y_flipped}_{x}.png`. The y
/// coordinate in the name counts from the top so the assembly pass can
/// paint rows in file order.
pub fn staging_name(tile_id: u32, size_id: SizeId, total: u32, y_flipped: u32, x: u32) -> String {
    format!("{}_{}_{}_{}_{}.png", tile_id, size_id.raw(), total, y_flipped, x)
}

fn staged_done(path: &Path, min_bytes: u64) -> bool {
    path.metadata().map(|m| m.len() >= min_bytes).unwrap_or(false)
}

/// Plan the full-resolution chunk grid for a tile.
pub fn jobs_for_tile(meta: &TileMetadata, staging_dir: &Path, attempts: u32) -> Result<PlannedTile> {
    // A degenerate tile at a pole cannot be partitioned sensibly.
    if meta.bbox.width().abs() < 1e-12 {
        debug!("dropping degenerate tile {} at a pole", meta.id);
        return Ok(PlannedTile::default());
    }

    let cols = meta.cols;
    let total = cols * cols;
    let chunk_w = meta.width_px / cols;
    let lon_step = meta.bbox.width() / cols as f64;
    let lat_step = meta.bbox.height() / cols as f64;

    let mut planned = PlannedTile::default();
    for y in 1..=cols {
        for x in 1..=cols {
            let bbox = BBox {
                lon_ll: meta.bbox.lon_ll + (x - 1) as f64 * lon_step,
                lat_ll: meta.bbox.lat_ll + (y - 1) as f64 * lat_step,
                lon_ur: meta.bbox.lon_ll + x as f64 * lon_step,
                lat_ur: meta.bbox.lat_ll + y as f64 * lat_step,
            };
            let y_flipped = cols - y + 1;
            let staging_path =
                staging_dir.join(staging_name(meta.id.raw(), meta.size_id, total, y_flipped, x));
            if staged_done(&staging_path, MIN_CHUNK_BYTES) {
                planned.already_staged += 1;
                continue;
            }
            planned.jobs.push(ChunkJob {
                tile_id: meta.id.raw(),
                size_id: meta.size_id,
                x,
                y,
                bbox,
                width_px: chunk_w,
                height_px: chunk_pixel_height(chunk_w, &bbox),
                staging_path,
                retries_left: attempts,
                attempts,
            });
        }
    }
    Ok(planned)
}

/// Plan the single coarse pre-coverage chunk for a tile. The chunk covers
/// the whole tile at the given (coarser) class.
pub fn precover_job(
    meta: &TileMetadata,
    level: SizeId,
    staging_dir: &Path,
    attempts: u32,
) -> Result<Option<ChunkJob>> {
    if meta.bbox.width().abs() < 1e-12 {
        return Ok(None);
    }
    let width_px = level.width_px();
    let staging_path = staging_dir.join(staging_name(meta.id.raw(), level, 1, 1, 1));
    if staged_done(&staging_path, MIN_PRECOVER_BYTES) {
        return Ok(None);
    }
    Ok(Some(ChunkJob {
        tile_id: meta.id.raw(),
        size_id: level,
        x: 1,
        y: 1,
        bbox: meta.bbox,
        width_px,
        height_px: chunk_pixel_height(width_px, &meta.bbox),
        staging_path,
        retries_left: attempts,
        attempts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn meta(size_id: u8) -> TileMetadata {
        TileMetadata::discover(11.31, 47.25, SizeId::new(size_id).unwrap()).unwrap()
    }

    #[test]
    fn test_grid_partitions_tile_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta(4); // 4x4 chunks
        let planned = jobs_for_tile(&meta, dir.path(), 3).unwrap();
        assert_eq!(planned.jobs.len(), 16);
        assert_eq!(planned.already_staged, 0);

        // Union of bboxes covers the tile with zero overlap: corners meet
        // exactly and the sum of areas equals the tile area.
        let tile_area = meta.bbox.width() * meta.bbox.height();
        let sum: f64 = planned
            .jobs
            .iter()
            .map(|j| j.bbox.width() * j.bbox.height())
            .sum();
        assert!((sum - tile_area).abs() < 1e-12);
        for j in &planned.jobs {
            assert!(j.bbox.lon_ll >= meta.bbox.lon_ll - 1e-12);
            assert!(j.bbox.lon_ur <= meta.bbox.lon_ur + 1e-12);
            assert!(j.x >= 1 && j.x <= 4 && j.y >= 1 && j.y <= 4);
        }
        // Neighbor chunks share edges exactly.
        let a = &planned.jobs[0];
        let b = &planned.jobs[1];
        assert_eq!(a.bbox.lon_ur, b.bbox.lon_ll);
    }

    #[test]
    fn test_pixel_sizes_follow_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta(4); // 8192px over a 0.25 x 0.125 degree tile
        let planned = jobs_for_tile(&meta, dir.path(), 3).unwrap();
        for j in &planned.jobs {
            assert_eq!(j.width_px, 8192 / 4);
            // Half as tall as wide, matching the 2:1 tile aspect.
            assert_eq!(j.height_px, 1024);
        }
    }

    #[test]
    fn test_staging_names_flip_y() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta(3); // 2x2
        let planned = jobs_for_tile(&meta, dir.path(), 3).unwrap();
        let south_west = planned.jobs.iter().find(|j| j.x == 1 && j.y == 1).unwrap();
        let name = south_west.staging_path.file_name().unwrap().to_str().unwrap();
        // Southmost row is the last row in top-first file coordinates.
        assert_eq!(name, format!("{}_3_4_2_1.png", meta.id));
    }

    #[test]
    fn test_existing_staged_chunks_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta(3);
        let name = staging_name(meta.id.raw(), meta.size_id, 4, 2, 1);
        fs::write(dir.path().join(&name), vec![0u8; 2048]).unwrap();
        // An undersized file does not count.
        let small = staging_name(meta.id.raw(), meta.size_id, 4, 1, 1);
        fs::write(dir.path().join(&small), vec![0u8; 100]).unwrap();

        let planned = jobs_for_tile(&meta, dir.path(), 3).unwrap();
        assert_eq!(planned.already_staged, 1);
        assert_eq!(planned.jobs.len(), 3);
    }

    #[test]
    fn test_precover_is_single_whole_tile_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta(5);
        let job = precover_job(&meta, SizeId::new(1).unwrap(), dir.path(), 3)
            .unwrap()
            .unwrap();
        assert_eq!(job.bbox, meta.bbox);
        assert_eq!(job.width_px, 1024);
        assert_eq!(job.height_px, 512);
        let name = job.staging_path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, format!("{}_1_1_1_1.png", meta.id));
    }

    #[test]
    fn test_retry_accounting() {
        let mut job = ChunkJob {
            tile_id: 1,
            size_id: SizeId::new(0).unwrap(),
            x: 1,
            y: 1,
            bbox: BBox { lon_ll: 0.0, lat_ll: 0.0, lon_ur: 0.125, lat_ur: 0.125 },
            width_px: 512,
            height_px: 512,
            staging_path: PathBuf::from("/tmp/x.png"),
            retries_left: 3,
            attempts: 3,
        };
        assert_eq!(job.attempt_index(), 0);
        job.retries_left -= 1;
        assert_eq!(job.attempt_index(), 1);
    }
}
