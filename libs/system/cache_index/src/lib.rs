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

//! A process-wide index of every tile file discovered under the scenery
//! and backup trees. Persisted as JSON so later sessions can skip the
//! scan, rebuilt whenever the program version or the scanned roots change.

mod coverage;
mod scan;

pub use coverage::{CoverageBBox, CoverageEntry};

use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use status_bus::CancelToken;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};
use tile_grid::SizeId;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One indexed tile file. Keyed externally by absolute path, which is
/// unique by construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub id: u32,
    pub size: u64,
    pub last_modified: String,
    #[serde(rename = "sizeId")]
    pub size_id: u8,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct IndexMetadata {
    program_version: String,
    scanned_paths: Vec<String>,
    last_scan: String,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    metadata: IndexMetadata,
    files: BTreeMap<String, CacheRecord>,
}

/// Where a cached tile lives, in restore-priority order.
#[derive(Clone, Debug, PartialEq)]
pub enum CachedTile {
    Final(PathBuf, CacheRecord),
    Backup(PathBuf, CacheRecord),
}

struct Inner {
    files: BTreeMap<String, CacheRecord>,
    dirty: bool,
    last_scan: String,
}

pub struct CacheIndex {
    index_path: PathBuf,
    coverage_path: PathBuf,
    final_root: PathBuf,
    backup_root: PathBuf,
    version: String,
    inner: Mutex<Inner>,
}

impl CacheIndex {
    /// Load the persisted index, or rebuild it from a filesystem scan when
    /// the metadata no longer matches this program and configuration.
    pub fn open(
        final_root: &Path,
        backup_root: &Path,
        index_path: &Path,
        version: &str,
    ) -> Result<Arc<Self>> {
        let index = Arc::new(Self {
            index_path: index_path.to_owned(),
            coverage_path: index_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("coverage.json"),
            final_root: final_root.to_owned(),
            backup_root: backup_root.to_owned(),
            version: version.to_owned(),
            inner: Mutex::new(Inner {
                files: BTreeMap::new(),
                dirty: false,
                last_scan: String::new(),
            }),
        });

        match index.try_load() {
            Ok(true) => debug!("cache index loaded from {}", index_path.display()),
            Ok(false) => {
                info!("cache index stale or missing, rebuilding");
                index.rebuild()?;
            }
            Err(e) => {
                // A broken index is not worth failing a session over.
                warn!("cache index unreadable ({}), rebuilding", e);
                index.rebuild()?;
            }
        }
        Ok(index)
    }

    pub fn final_root(&self) -> &Path {
        &self.final_root
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    fn scanned_paths(&self) -> Vec<String> {
        vec![
            self.final_root.display().to_string(),
            self.backup_root.display().to_string(),
        ]
    }

    /// Returns Ok(true) when the persisted file was usable as-is.
    fn try_load(&self) -> Result<bool> {
        if !self.index_path.exists() {
            return Ok(false);
        }
        let raw = fs::read_to_string(&self.index_path)?;
        let parsed: IndexFile = serde_json::from_str(&raw)?;
        if parsed.metadata.program_version != self.version
            || parsed.metadata.scanned_paths != self.scanned_paths()
        {
            return Ok(false);
        }
        let mut inner = self.inner.lock();
        inner.files = parsed.files;
        inner.last_scan = parsed.metadata.last_scan;
        inner.dirty = false;
        Ok(true)
    }

    /// Discard the in-memory table and re-scan both trees.
    pub fn rebuild(&self) -> Result<()> {
        let found = scan::scan_roots(&[&self.final_root, &self.backup_root]);
        let mut inner = self.inner.lock();
        inner.files = found;
        inner.last_scan = Local::now().format(TIMESTAMP_FORMAT).to_string();
        inner.dirty = true;
        drop(inner);
        self.save()
    }

    /// Incremental scan: add new and changed files. Returns how many
    /// records were added or updated; only writes when that is non-zero.
    pub fn rescan(&self) -> Result<usize> {
        let found = scan::scan_roots(&[&self.final_root, &self.backup_root]);
        let mut changed = 0;
        {
            let mut inner = self.inner.lock();
            for (path, record) in found {
                match inner.files.get(&path) {
                    Some(existing) if *existing == record => {}
                    _ => {
                        inner.files.insert(path, record);
                        changed += 1;
                    }
                }
            }
            if changed > 0 {
                inner.last_scan = Local::now().format(TIMESTAMP_FORMAT).to_string();
                inner.dirty = true;
            }
        }
        if changed > 0 {
            self.save()?;
        }
        Ok(changed)
    }

    /// Probe one file and insert or refresh its record. Used by placement
    /// after every move so the index never lags the tree.
    pub fn record_file(&self, path: &Path) -> Result<()> {
        if let Some((key, record)) = scan::probe_file(path) {
            let mut inner = self.inner.lock();
            inner.files.insert(key, record);
            inner.dirty = true;
            drop(inner);
            self.save()?;
        }
        Ok(())
    }

    pub fn remove_path(&self, path: &Path) {
        let key = path.display().to_string();
        let mut inner = self.inner.lock();
        if inner.files.remove(&key).is_some() {
            inner.dirty = true;
        }
    }

    pub fn lookup(&self, path: &Path) -> Option<CacheRecord> {
        self.inner.lock().files.get(&path.display().to_string()).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_under_final(&self, path: &str) -> bool {
        Path::new(path).starts_with(&self.final_root)
    }

    /// True when the final tree already holds this tile at the wanted
    /// class or better.
    pub fn is_satisfied(&self, tile_id: u32, want: SizeId) -> bool {
        let inner = self.inner.lock();
        inner.files.iter().any(|(path, r)| {
            r.id == tile_id && r.size_id >= want.raw() && self.is_under_final(path)
        })
    }

    /// Locate the best cached copy of a tile, scanning resolution classes
    /// nearest-first from the requested one. The final tree always
    /// outranks the backup tree at equal distance.
    pub fn best_cached(&self, tile_id: u32, want: SizeId, allow_higher: bool) -> Option<CachedTile> {
        let inner = self.inner.lock();
        let candidates: Vec<(&String, &CacheRecord)> =
            inner.files.iter().filter(|(_, r)| r.id == tile_id).collect();
        if candidates.is_empty() {
            return None;
        }
        for distance in 0..=6i32 {
            let mut levels = vec![want.raw() as i32 - distance];
            if distance > 0 && allow_higher {
                levels.push(want.raw() as i32 + distance);
            }
            for level in levels {
                if !(0..=6).contains(&level) {
                    continue;
                }
                let mut found: Option<CachedTile> = None;
                for (path, r) in &candidates {
                    if r.size_id != level as u8 {
                        continue;
                    }
                    let hit = if self.is_under_final(path) {
                        CachedTile::Final(PathBuf::from(path), (*r).clone())
                    } else {
                        CachedTile::Backup(PathBuf::from(path), (*r).clone())
                    };
                    match (&found, &hit) {
                        (None, _) | (Some(CachedTile::Backup(..)), CachedTile::Final(..)) => {
                            found = Some(hit)
                        }
                        _ => {}
                    }
                }
                if found.is_some() {
                    return found;
                }
            }
        }
        None
    }

    /// Persist the table with write-to-temp + rename, then refresh the
    /// coverage snapshot.
    pub fn save(&self) -> Result<()> {
        let doc = {
            let mut inner = self.inner.lock();
            if !inner.dirty {
                return Ok(());
            }
            inner.dirty = false;
            IndexFile {
                metadata: IndexMetadata {
                    program_version: self.version.clone(),
                    scanned_paths: self.scanned_paths(),
                    last_scan: inner.last_scan.clone(),
                },
                files: inner.files.clone(),
            }
        };
        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.index_path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&doc)?;
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.index_path)?;
        debug!("cache index saved: {} files", doc.files.len());

        if let Err(e) = coverage::write_snapshot(self, &self.coverage_path) {
            // Index errors never block job progress.
            warn!("coverage snapshot failed: {}", e);
        }
        Ok(())
    }

    pub(crate) fn snapshot_files(&self) -> Vec<(String, CacheRecord)> {
        self.inner
            .lock()
            .files
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn coverage(&self) -> Vec<CoverageEntry> {
        coverage::build_snapshot(self)
    }

    /// Periodic background rescan; writes only when the tree actually
    /// changed.
    pub fn spawn_rescan(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancelToken,
    ) -> thread::JoinHandle<()> {
        let index = Arc::clone(self);
        thread::Builder::new()
            .name("cache-rescan".to_owned())
            .spawn(move || {
                let mut waited = Duration::from_secs(0);
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    thread::sleep(Duration::from_millis(250));
                    waited += Duration::from_millis(250);
                    if waited < interval {
                        continue;
                    }
                    waited = Duration::from_secs(0);
                    match index.rescan() {
                        Ok(0) => {}
                        Ok(n) => info!("cache rescan picked up {} files", n),
                        Err(e) => warn!("cache rescan failed: {}", e),
                    }
                }
            })
            .expect("spawning cache rescan thread")
    }
}
