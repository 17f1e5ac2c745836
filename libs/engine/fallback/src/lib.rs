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

//! When the map server definitively refuses a tile's chunks, this stage
//! decides what the user gets instead: a cached copy if one exists at a
//! workable resolution, otherwise the same tile one class coarser.

use cache_index::{CacheIndex, CachedTile};
use chunk_jobs::jobs_for_tile;
use crossbeam::channel::RecvTimeoutError;
use download::{DownloadHub, PermanentFailure, Priority};
use log::{debug, info, warn};
use placement::{restore_from_backup, SceneryPaths};
use status_bus::CancelToken;
use std::{
    collections::HashSet,
    fs,
    sync::Arc,
    thread,
    time::Duration,
};
use tile_grid::TileMetadata;

/// What the manager did with an event; exposed for tests and logging.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FallbackAction {
    /// A repeat of an event this session has already handled.
    Duplicate,
    /// The final tree already holds an acceptable copy.
    AlreadySatisfied,
    /// A backup copy was moved into the final tree.
    Restored,
    /// New jobs were queued one resolution class down.
    Downgraded { new_size_id: u8, jobs: usize },
    /// Already at the lowest class; nothing more to try.
    Abandoned,
}

pub struct FallbackManager {
    hub: Arc<DownloadHub>,
    index: Arc<CacheIndex>,
    paths: SceneryPaths,
    attempts: u32,
    allow_higher: bool,
    seen: HashSet<PermanentFailure>,
}

impl FallbackManager {
    pub fn new(
        hub: Arc<DownloadHub>,
        index: Arc<CacheIndex>,
        paths: SceneryPaths,
        attempts: u32,
        allow_higher: bool,
    ) -> Self {
        Self {
            hub,
            index,
            paths,
            attempts,
            allow_higher,
            seen: HashSet::new(),
        }
    }

    /// Handle one permanent-failure event.
    pub fn handle(&mut self, event: PermanentFailure) -> FallbackAction {
        if !self.seen.insert(event) {
            return FallbackAction::Duplicate;
        }
        let meta = TileMetadata::from_id(tile_grid::TileId::from_raw(event.tile_id), event.size_id);

        match self.index.best_cached(event.tile_id, event.size_id, self.allow_higher) {
            Some(CachedTile::Final(path, record)) => {
                debug!(
                    "tile {} already covered by {} (class {})",
                    event.tile_id,
                    path.display(),
                    record.size_id
                );
                FallbackAction::AlreadySatisfied
            }
            Some(CachedTile::Backup(path, record)) => {
                info!(
                    "restoring tile {} from backup {} (class {})",
                    event.tile_id,
                    path.display(),
                    record.size_id
                );
                match restore_from_backup(&path, &meta, &self.paths, &self.index) {
                    Ok(_) => FallbackAction::Restored,
                    Err(e) => {
                        // A failed restore degenerates into the downgrade
                        // path rather than losing the tile outright.
                        warn!("restore of {} failed: {}", path.display(), e);
                        self.downgrade(&meta)
                    }
                }
            }
            None => self.downgrade(&meta),
        }
    }

    fn downgrade(&self, meta: &TileMetadata) -> FallbackAction {
        let down = match meta.downgraded() {
            Some(down) => down,
            None => {
                warn!("tile {} failed at the lowest class; giving up", meta.id);
                return FallbackAction::Abandoned;
            }
        };
        self.purge_staged(meta);

        let planned = match jobs_for_tile(&down, self.paths.staging(), self.attempts) {
            Ok(p) => p,
            Err(e) => {
                warn!("replanning tile {} failed: {}", meta.id, e);
                return FallbackAction::Abandoned;
            }
        };
        let count = planned.jobs.len();
        info!(
            "tile {} downgraded to class {} ({} chunks)",
            meta.id,
            down.size_id.raw(),
            count
        );
        self.hub
            .status()
            .register_tile(down.id.raw(), down.cols, down.cols * down.cols);
        for job in planned.jobs {
            self.hub.submit(job, Priority::Low);
        }
        FallbackAction::Downgraded {
            new_size_id: down.size_id.raw(),
            jobs: count,
        }
    }

    /// Remove any chunks staged for the failed (tile, class) pair; they
    /// can never assemble into a complete group.
    fn purge_staged(&self, meta: &TileMetadata) {
        let prefix = format!("{}_{}_", meta.id, meta.size_id.raw());
        if let Ok(entries) = fs::read_dir(self.paths.staging()) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(&prefix) {
                    debug!("purging staged chunk {:?}", name);
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
    }

    /// Consume events until cancellation.
    pub fn spawn(mut self, cancel: CancelToken) -> thread::JoinHandle<()> {
        let failures = self.hub.failures();
        thread::Builder::new()
            .name("fallback".to_owned())
            .spawn(move || loop {
                if cancel.is_cancelled() {
                    return;
                }
                match failures.recv_timeout(Duration::from_millis(250)) {
                    Ok(event) => {
                        let action = self.handle(event);
                        debug!("fallback for tile {}: {:?}", event.tile_id, action);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            })
            .expect("spawning fallback thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use status_bus::StatusBus;
    use tile_grid::SizeId;

    struct Rig {
        _dir: tempfile::TempDir,
        hub: Arc<DownloadHub>,
        index: Arc<CacheIndex>,
        paths: SceneryPaths,
        meta: TileMetadata,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let paths = SceneryPaths::new(&dir.path().join("Orthophotos"));
        paths.ensure_trees().unwrap();
        let index = CacheIndex::open(
            paths.root(),
            paths.backup_root(),
            &dir.path().join("index.json"),
            "test",
        )
        .unwrap();
        let hub = DownloadHub::new(Arc::new(StatusBus::new()), CancelToken::new());
        let meta = TileMetadata::discover(11.31, 47.25, SizeId::new(3).unwrap()).unwrap();
        Rig {
            _dir: dir,
            hub,
            index,
            paths,
            meta,
        }
    }

    fn manager(rig: &Rig) -> FallbackManager {
        FallbackManager::new(
            Arc::clone(&rig.hub),
            Arc::clone(&rig.index),
            rig.paths.clone(),
            3,
            true,
        )
    }

    fn event(rig: &Rig) -> PermanentFailure {
        PermanentFailure {
            tile_id: rig.meta.id.raw(),
            size_id: rig.meta.size_id,
        }
    }

    fn stage_backup(rig: &Rig, px: u32) -> std::path::PathBuf {
        let path = rig.paths.backup_path(&rig.meta, px, "dds");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let img = RgbaImage::from_pixel(px, px, image::Rgba([5, 5, 5, 255]));
        dxt1::convert_image(&img, &path).unwrap();
        rig.index.rescan().unwrap();
        path
    }

    #[test]
    fn test_downgrade_without_cache() {
        let rig = rig();
        let mut mgr = manager(&rig);
        match mgr.handle(event(&rig)) {
            FallbackAction::Downgraded { new_size_id, jobs } => {
                assert_eq!(new_size_id, 2);
                // Class 2 is a single-chunk tile.
                assert_eq!(jobs, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        // The replacement work went onto the LOW lane.
        assert_eq!(rig.hub.queue_lens(), (0, 1));
    }

    #[test]
    fn test_events_deduplicate() {
        let rig = rig();
        let mut mgr = manager(&rig);
        assert_ne!(mgr.handle(event(&rig)), FallbackAction::Duplicate);
        assert_eq!(mgr.handle(event(&rig)), FallbackAction::Duplicate);
        // Only one downgrade hit the queue.
        assert_eq!(rig.hub.queue_lens(), (0, 1));
    }

    #[test]
    fn test_restore_moves_backup_into_final_tree() {
        let rig = rig();
        let backup = stage_backup(&rig, 512);
        let mut mgr = manager(&rig);
        assert_eq!(mgr.handle(event(&rig)), FallbackAction::Restored);
        assert!(!backup.exists());
        let restored = rig.paths.tile_path(&rig.meta, "dds");
        assert!(restored.exists());
        // No replacement downloads were queued.
        assert_eq!(rig.hub.queue_len(), 0);
    }

    #[test]
    fn test_no_downgrade_below_zero() {
        let rig = rig();
        let mut mgr = manager(&rig);
        let bottom = PermanentFailure {
            tile_id: rig.meta.id.raw(),
            size_id: SizeId::new(0).unwrap(),
        };
        assert_eq!(mgr.handle(bottom), FallbackAction::Abandoned);
        assert_eq!(rig.hub.queue_len(), 0);
    }

    #[test]
    fn test_purges_stale_chunks_on_downgrade() {
        let rig = rig();
        let staging = rig.paths.staging();
        let stale = staging.join(format!("{}_3_4_1_1.png", rig.meta.id));
        fs::write(&stale, vec![0u8; 2048]).unwrap();
        let unrelated = staging.join("9999999_3_4_1_1.png");
        fs::write(&unrelated, vec![0u8; 2048]).unwrap();

        let mut mgr = manager(&rig);
        mgr.handle(event(&rig));
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }
}
