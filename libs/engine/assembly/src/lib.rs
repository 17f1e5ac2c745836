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

//! The assembly stage. A polling monitor watches the staging directory,
//! claims chunk groups as they become complete, mosaics them into a full
//! tile image, transcodes to DDS and hands the result to placement.

use anyhow::{anyhow, bail, Result};
use cache_index::CacheIndex;
use image::RgbaImage;
use log::{debug, info, warn};
use parking_lot::Mutex;
use placement::{place, OverwriteMode, SceneryPaths};
use regex::Regex;
use status_bus::{CancelToken, StatusBus};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration,
};
use tile_grid::{SizeId, TileId, TileMetadata};

/// Identity of one assembly group: every chunk file carries these three
/// values in its name.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct GroupKey {
    pub tile_id: u32,
    pub size_id: u8,
    pub total: u32,
}

#[derive(Clone, Debug)]
struct ChunkFile {
    y: u32,
    x: u32,
    path: PathBuf,
    bytes: u64,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub min_chunk_bytes: u64,
    /// Emit PNG tiles instead of DDS.
    pub prefer_png: bool,
    pub overwrite: OverwriteMode,
    /// Groups that keep failing are dropped after this many attempts.
    pub max_passes: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            min_chunk_bytes: 1024,
            prefer_png: false,
            overwrite: OverwriteMode::Upgrade,
            max_passes: 5,
        }
    }
}

pub struct AssemblyMonitor {
    staging: PathBuf,
    paths: SceneryPaths,
    index: Arc<CacheIndex>,
    status: Arc<StatusBus>,
    cfg: MonitorConfig,
    pattern: Regex,
    claimed: HashSet<GroupKey>,
    seen: HashSet<GroupKey>,
    dropped: HashSet<GroupKey>,
    failed_passes: HashMap<GroupKey, u32>,
}

impl AssemblyMonitor {
    pub fn new(
        paths: &SceneryPaths,
        index: Arc<CacheIndex>,
        status: Arc<StatusBus>,
        cfg: MonitorConfig,
    ) -> Self {
        Self {
            staging: paths.staging().to_owned(),
            paths: paths.clone(),
            index,
            status,
            cfg,
            pattern: Regex::new(r"^(\d+)_(\d+)_([1-9]\d*)_([1-9]\d*)_([1-9]\d*)\.png$")
                .expect("static regex"),
            claimed: HashSet::new(),
            seen: HashSet::new(),
            dropped: HashSet::new(),
            failed_passes: HashMap::new(),
        }
    }

    pub fn has_assembled(&self, tile_id: u32) -> bool {
        self.seen.iter().any(|k| k.tile_id == tile_id)
    }

    pub fn assembled_count(&self) -> usize {
        self.seen.len()
    }

    /// One pass over the staging directory. Returns the number of tiles
    /// assembled and placed during this pass.
    pub fn scan_pass(&mut self) -> usize {
        let groups = self.collect_groups();
        let mut assembled = 0;
        for (key, files) in groups {
            if self.seen.contains(&key) || self.dropped.contains(&key) {
                continue;
            }
            if files.len() as u32 != key.total
                || files.iter().any(|f| f.bytes < self.cfg.min_chunk_bytes)
            {
                continue;
            }
            if !self.claimed.insert(key) {
                continue;
            }
            match self.assemble_group(&key, &files) {
                Ok(()) => {
                    self.seen.insert(key);
                    for f in &files {
                        let _ = fs::remove_file(&f.path);
                    }
                    assembled += 1;
                }
                Err(e) => {
                    let passes = self.failed_passes.entry(key).or_insert(0);
                    *passes += 1;
                    warn!(
                        "assembly of tile {} failed (pass {}): {}",
                        key.tile_id, passes, e
                    );
                    if *passes >= self.cfg.max_passes {
                        warn!("dropping group for tile {} after {} passes", key.tile_id, passes);
                        self.dropped.insert(key);
                        self.status.push_log(format!(
                            "tile {} dropped: chunks never assembled",
                            key.tile_id
                        ));
                    }
                }
            }
            self.claimed.remove(&key);
        }
        assembled
    }

    fn collect_groups(&self) -> HashMap<GroupKey, Vec<ChunkFile>> {
        let mut groups: HashMap<GroupKey, Vec<ChunkFile>> = HashMap::new();
        let entries = match fs::read_dir(&self.staging) {
            Ok(e) => e,
            Err(_) => return groups,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            let caps = match self.pattern.captures(name) {
                Some(c) => c,
                None => continue,
            };
            // The pattern guarantees the numeric fields parse.
            let key = GroupKey {
                tile_id: caps[1].parse().unwrap_or(0),
                size_id: caps[2].parse().unwrap_or(0),
                total: caps[3].parse().unwrap_or(0),
            };
            let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            groups.entry(key).or_default().push(ChunkFile {
                y: caps[4].parse().unwrap_or(0),
                x: caps[5].parse().unwrap_or(0),
                path: entry.path(),
                bytes,
            });
        }
        groups
    }

    fn assemble_group(&self, key: &GroupKey, files: &[ChunkFile]) -> Result<()> {
        let cols = (key.total as f64).sqrt().round() as u32;
        if cols * cols != key.total {
            bail!("group total {} is not a square grid", key.total);
        }

        let first = image::open(&files[0].path)
            .map_err(|e| anyhow!("chunk {} unreadable: {}", files[0].path.display(), e))?
            .to_rgba8();
        let (chunk_w, chunk_h) = first.dimensions();
        let mut canvas = RgbaImage::new(chunk_w * cols, chunk_h * cols);

        for f in files {
            if f.x < 1 || f.x > cols || f.y < 1 || f.y > cols {
                bail!("chunk {} outside the {}x{} grid", f.path.display(), cols, cols);
            }
            let img = image::open(&f.path)
                .map_err(|e| anyhow!("chunk {} unreadable: {}", f.path.display(), e))?
                .to_rgba8();
            if img.dimensions() != (chunk_w, chunk_h) {
                bail!(
                    "chunk {} is {}x{}, expected {}x{}",
                    f.path.display(),
                    img.width(),
                    img.height(),
                    chunk_w,
                    chunk_h
                );
            }
            // The filename's y counts rows from the top of the tile.
            let row0 = (f.y - 1) * chunk_h;
            let col0 = (f.x - 1) * chunk_w;
            image::imageops::replace(&mut canvas, &img, col0 as i64, row0 as i64);
        }

        let meta = TileMetadata::from_id(
            TileId::from_raw(key.tile_id),
            SizeId::new(key.size_id.min(6))?,
        );
        let staged = self.encode_tile(key, &canvas)?;
        let outcome = place(&staged, &meta, &self.paths, self.cfg.overwrite, &self.index)?;
        info!(
            "tile {} assembled from {} chunks: {:?}",
            key.tile_id, key.total, outcome
        );
        self.status
            .push_log(format!("tile {} assembled ({:?})", key.tile_id, outcome));
        Ok(())
    }

    /// Encode the canvas into the staging directory under its final name,
    /// DDS first with a PNG fallback for canvases DXT1 cannot hold.
    fn encode_tile(&self, key: &GroupKey, canvas: &RgbaImage) -> Result<PathBuf> {
        if !self.cfg.prefer_png {
            match dxt1::encode(canvas) {
                Ok(bytes) => {
                    let dest = self.staging.join(format!("{}.dds", TileId::from_raw(key.tile_id)));
                    let tmp = dest.with_extension("dds.tmp");
                    fs::write(&tmp, bytes)?;
                    fs::rename(&tmp, &dest)?;
                    return Ok(dest);
                }
                Err(e) => {
                    debug!("dds encode failed for tile {} ({}); saving png", key.tile_id, e);
                }
            }
        }
        let dest = self.staging.join(format!("{}.png", TileId::from_raw(key.tile_id)));
        let tmp = dest.with_extension("png.tmp");
        canvas.save_with_format(&tmp, image::ImageFormat::Png)?;
        fs::rename(&tmp, &dest)?;
        Ok(dest)
    }

    /// Poll until cancelled. The monitor object stays reachable through
    /// the shared handle for progress queries.
    pub fn spawn(monitor: Arc<Mutex<Self>>, cancel: CancelToken) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("assembly".to_owned())
            .spawn(move || {
                let interval = monitor.lock().cfg.interval;
                loop {
                    if cancel.is_cancelled() {
                        // One last sweep so chunks that landed during
                        // shutdown still become tiles.
                        monitor.lock().scan_pass();
                        return;
                    }
                    monitor.lock().scan_pass();
                    thread::sleep(interval);
                }
            })
            .expect("spawning assembly monitor thread")
    }
}
