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

//! The download stage: a pool of worker threads fed from two bounded
//! channels. HIGH carries pre-coverage and look-ahead work and strictly
//! preempts LOW; retries re-enter the class they were first enqueued on.

mod worker;

pub use worker::spawn_workers;

use chunk_jobs::ChunkJob;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use log::debug;
use parking_lot::Mutex;
use status_bus::{CancelToken, ChunkState, StatusBus};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tile_grid::SizeId;

const HIGH_CAPACITY: usize = 512;
const LOW_CAPACITY: usize = 4096;

/// Scheduling class of a chunk, fixed at first enqueue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Priority {
    High,
    Low,
}

/// Event raised when a chunk has definitively failed; consumed by the
/// fallback manager.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PermanentFailure {
    pub tile_id: u32,
    pub size_id: SizeId,
}

/// Tunables for the worker pool; defaults match a polite bulk client.
#[derive(Clone, Debug)]
pub struct DownloadConfig {
    pub workers: usize,
    pub user_agent: String,
    pub base_timeout: f64,
    pub retry_timeout_cap: f64,
    pub retry_timeout_factor: f64,
    pub retry_backoff_base: f64,
    pub retry_max_sleep: f64,
    pub max_redirects: usize,
    pub min_chunk_bytes: u64,
    pub proxy: Option<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            user_agent: format!("orthos/{}", env!("CARGO_PKG_VERSION")),
            base_timeout: 10.0,
            retry_timeout_cap: 60.0,
            retry_timeout_factor: 1.5,
            retry_backoff_base: 2.0,
            retry_max_sleep: 30.0,
            max_redirects: 5,
            min_chunk_bytes: 1024,
            proxy: None,
        }
    }
}

/// Escalated per-attempt timeout.
pub fn attempt_timeout(cfg: &DownloadConfig, attempt_index: u32) -> Duration {
    let secs = (cfg.base_timeout * cfg.retry_timeout_factor.powi(attempt_index as i32))
        .min(cfg.retry_timeout_cap);
    Duration::from_secs_f64(secs)
}

/// Exponential backoff before a retry.
pub fn backoff_sleep(cfg: &DownloadConfig, attempt_index: u32) -> Duration {
    let secs = cfg
        .retry_backoff_base
        .powi(attempt_index as i32)
        .min(cfg.retry_max_sleep);
    Duration::from_secs_f64(secs)
}

/// The shared state between producers and the worker pool.
pub struct DownloadHub {
    high_tx: Sender<ChunkJob>,
    high_rx: Receiver<ChunkJob>,
    low_tx: Sender<ChunkJob>,
    low_rx: Receiver<ChunkJob>,
    fail_tx: Sender<PermanentFailure>,
    fail_rx: Receiver<PermanentFailure>,
    // staging path -> class, so retries keep their lane.
    class: Mutex<HashMap<PathBuf, Priority>>,
    status: Arc<StatusBus>,
    cancel: CancelToken,
}

impl DownloadHub {
    pub fn new(status: Arc<StatusBus>, cancel: CancelToken) -> Arc<Self> {
        let (high_tx, high_rx) = bounded(HIGH_CAPACITY);
        let (low_tx, low_rx) = bounded(LOW_CAPACITY);
        let (fail_tx, fail_rx) = unbounded();
        Arc::new(Self {
            high_tx,
            high_rx,
            low_tx,
            low_rx,
            fail_tx,
            fail_rx,
            class: Mutex::new(HashMap::new()),
            status,
            cancel,
        })
    }

    pub fn status(&self) -> &Arc<StatusBus> {
        &self.status
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Channel the fallback manager listens on.
    pub fn failures(&self) -> Receiver<PermanentFailure> {
        self.fail_rx.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.high_rx.len() + self.low_rx.len()
    }

    /// (high, low) backlog, mostly for status reporting.
    pub fn queue_lens(&self) -> (usize, usize) {
        (self.high_rx.len(), self.low_rx.len())
    }

    /// First enqueue of a chunk. Blocks when the class channel is full,
    /// which is the backpressure the producers rely on.
    pub fn submit(&self, job: ChunkJob, class: Priority) {
        self.class.lock().insert(job.staging_path.clone(), class);
        self.status.add_pending(1);
        self.status
            .set_chunk_state(job.tile_id, job.x, job.y, ChunkState::Pending);
        let tx = match class {
            Priority::High => &self.high_tx,
            Priority::Low => &self.low_tx,
        };
        // Send fails only when the pool is torn down, at which point the
        // chunk is simply abandoned with the rest of the session.
        if tx.send(job).is_err() {
            self.status.finish_one(false);
        }
    }

    /// The recorded class of a staged chunk, defaulting to LOW for jobs
    /// the table has forgotten.
    pub fn class_of(&self, staging_path: &Path) -> Priority {
        self.class
            .lock()
            .get(staging_path)
            .copied()
            .unwrap_or(Priority::Low)
    }

    /// Re-enqueue after a transient failure, preserving the original
    /// class. Does not touch the pending counter: the chunk never left it.
    pub(crate) fn resubmit(&self, job: ChunkJob) {
        let class = self.class_of(&job.staging_path);
        debug!(
            "requeueing {} on {:?} ({} retries left)",
            job.staging_path.display(),
            class,
            job.retries_left
        );
        let tx = match class {
            Priority::High => &self.high_tx,
            Priority::Low => &self.low_tx,
        };
        if tx.send(job).is_err() {
            self.status.finish_one(false);
        }
    }

    pub(crate) fn report_permanent(&self, job: &ChunkJob) {
        self.class.lock().remove(&job.staging_path);
        self.status
            .set_chunk_state(job.tile_id, job.x, job.y, ChunkState::Failed);
        self.status.finish_one(false);
        let _ = self.fail_tx.send(PermanentFailure {
            tile_id: job.tile_id,
            size_id: job.size_id,
        });
    }

    pub(crate) fn report_completed(&self, job: &ChunkJob, downloaded_bytes: u64) {
        self.class.lock().remove(&job.staging_path);
        self.status
            .set_chunk_state(job.tile_id, job.x, job.y, ChunkState::Completed);
        self.status.finish_one(true);
        if downloaded_bytes > 0 {
            self.status.record_download(downloaded_bytes);
            self.status.add_tile_bytes(job.tile_id, downloaded_bytes);
        }
    }

    pub(crate) fn high_rx(&self) -> &Receiver<ChunkJob> {
        &self.high_rx
    }

    pub(crate) fn low_rx(&self) -> &Receiver<ChunkJob> {
        &self.low_rx
    }
}

/// Best-effort removal of interrupted `.tmp` downloads, called when a
/// session shuts down.
pub fn cleanup_staging_tmp(staging_dir: &Path) {
    if let Ok(entries) = fs::read_dir(staging_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                let _ = fs::remove_file(&path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_timeout_escalates_to_cap() {
        let cfg = DownloadConfig::default();
        assert_eq!(attempt_timeout(&cfg, 0), Duration::from_secs_f64(10.0));
        assert_eq!(attempt_timeout(&cfg, 1), Duration::from_secs_f64(15.0));
        assert_eq!(attempt_timeout(&cfg, 2), Duration::from_secs_f64(22.5));
        // Far attempts saturate at the cap.
        assert_eq!(attempt_timeout(&cfg, 20), Duration::from_secs_f64(60.0));
    }

    #[test]
    fn test_backoff_saturates() {
        let cfg = DownloadConfig::default();
        assert_eq!(backoff_sleep(&cfg, 0), Duration::from_secs_f64(1.0));
        assert_eq!(backoff_sleep(&cfg, 1), Duration::from_secs_f64(2.0));
        assert_eq!(backoff_sleep(&cfg, 3), Duration::from_secs_f64(8.0));
        assert_eq!(backoff_sleep(&cfg, 10), Duration::from_secs_f64(30.0));
    }

    #[test]
    fn test_class_table_preserves_lane() {
        let hub = DownloadHub::new(Arc::new(StatusBus::new()), CancelToken::new());
        let job = sample_job("a.png");
        hub.submit(job.clone(), Priority::High);
        assert_eq!(hub.class_of(&job.staging_path), Priority::High);

        let other = sample_job("b.png");
        hub.submit(other.clone(), Priority::Low);
        assert_eq!(hub.class_of(&other.staging_path), Priority::Low);
        assert_eq!(hub.queue_len(), 2);
        assert_eq!(hub.status().pending(), 2);
    }

    #[test]
    fn test_resubmit_keeps_original_class() {
        let hub = DownloadHub::new(Arc::new(StatusBus::new()), CancelToken::new());
        let job = sample_job("retry.png");
        hub.submit(job.clone(), Priority::High);
        assert_eq!(hub.queue_lens(), (1, 0));
        // A retry of the same staging path re-enters HIGH, not LOW.
        let mut retry = job;
        retry.retries_left -= 1;
        hub.resubmit(retry);
        assert_eq!(hub.queue_lens(), (2, 0));

        let low = sample_job("bulk.png");
        hub.submit(low.clone(), Priority::Low);
        hub.resubmit(low);
        assert_eq!(hub.queue_lens(), (2, 2));
    }

    #[test]
    fn test_permanent_failure_reaches_listener() {
        let hub = DownloadHub::new(Arc::new(StatusBus::new()), CancelToken::new());
        let failures = hub.failures();
        let job = sample_job("c.png");
        hub.status().add_pending(1);
        hub.report_permanent(&job);
        let event = failures.try_recv().unwrap();
        assert_eq!(event.tile_id, job.tile_id);
        assert_eq!(event.size_id, job.size_id);
        assert_eq!(hub.status().failed(), 1);
    }

    fn sample_job(name: &str) -> ChunkJob {
        ChunkJob {
            tile_id: 3138129,
            size_id: SizeId::new(2).unwrap(),
            x: 1,
            y: 1,
            bbox: tile_grid::BBox {
                lon_ll: 11.25,
                lat_ll: 47.25,
                lon_ur: 11.5,
                lat_ur: 47.375,
            },
            width_px: 2048,
            height_px: 1024,
            staging_path: PathBuf::from("/tmp/staging").join(name),
            retries_left: 3,
            attempts: 3,
        }
    }
}
