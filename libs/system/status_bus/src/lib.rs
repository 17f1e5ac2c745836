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

//! Shared progress state. Everything here is owned by one application
//! context handed into each subsystem at startup; there are no
//! module-level singletons.

use chrono::{DateTime, Local};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

const LOG_CHANNEL_CAPACITY: usize = 200;

/// Cooperative cancellation shared by workers, monitors and the control
/// plane.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of one chunk within a tile's download grid.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChunkState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Progress of one active tile. Guarded by its own mutex so workers on
/// different tiles never contend.
#[derive(Debug)]
pub struct TileProgress {
    pub total_chunks: u32,
    pub chunks_completed: u32,
    pub grid: Vec<ChunkState>,
    pub cols: u32,
    pub downloaded_bytes: u64,
    pub started: Instant,
    pub status: String,
}

impl TileProgress {
    fn new(cols: u32, total_chunks: u32) -> Self {
        Self {
            total_chunks,
            chunks_completed: 0,
            grid: vec![ChunkState::Pending; (cols * cols) as usize],
            cols,
            downloaded_bytes: 0,
            started: Instant::now(),
            status: "queued".to_owned(),
        }
    }

    fn slot(&mut self, x: u32, y: u32) -> Option<&mut ChunkState> {
        // Chunk coordinates are one-based.
        if x == 0 || y == 0 || x > self.cols || y > self.cols {
            return None;
        }
        let idx = ((y - 1) * self.cols + (x - 1)) as usize;
        self.grid.get_mut(idx)
    }
}

pub struct StatusBus {
    pending: AtomicUsize,
    done: AtomicUsize,
    failed: AtomicUsize,
    files_downloaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    started: DateTime<Local>,
    // Registry membership under the outer mutex; per-tile state under the
    // inner ones.
    tiles: Mutex<HashMap<u32, Arc<Mutex<TileProgress>>>>,
    log_tx: Sender<String>,
    log_rx: Receiver<String>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    pub fn new() -> Self {
        let (log_tx, log_rx) = bounded(LOG_CHANNEL_CAPACITY);
        Self {
            pending: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            files_downloaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            started: Local::now(),
            tiles: Mutex::new(HashMap::new()),
            log_tx,
            log_rx,
        }
    }

    pub fn session_start(&self) -> &DateTime<Local> {
        &self.started
    }

    pub fn add_pending(&self, n: usize) {
        self.pending.fetch_add(n, Ordering::SeqCst);
    }

    pub fn finish_one(&self, success: bool) {
        // A chunk leaves pending exactly once, into done or failed.
        self.pending.fetch_sub(1, Ordering::SeqCst);
        if success {
            self.done.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn record_download(&self, bytes: u64) {
        self.files_downloaded.fetch_add(1, Ordering::SeqCst);
        self.bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn session_totals(&self) -> (u64, u64) {
        (
            self.files_downloaded.load(Ordering::SeqCst),
            self.bytes_downloaded.load(Ordering::SeqCst),
        )
    }

    /// Register a tile's download grid, replacing any stale entry.
    pub fn register_tile(&self, tile_id: u32, cols: u32, total_chunks: u32) {
        self.tiles
            .lock()
            .insert(tile_id, Arc::new(Mutex::new(TileProgress::new(cols, total_chunks))));
    }

    pub fn forget_tile(&self, tile_id: u32) {
        self.tiles.lock().remove(&tile_id);
    }

    pub fn tile(&self, tile_id: u32) -> Option<Arc<Mutex<TileProgress>>> {
        self.tiles.lock().get(&tile_id).cloned()
    }

    pub fn active_tiles(&self) -> Vec<u32> {
        self.tiles.lock().keys().copied().collect()
    }

    pub fn set_chunk_state(&self, tile_id: u32, x: u32, y: u32, state: ChunkState) {
        if let Some(tile) = self.tile(tile_id) {
            let mut t = tile.lock();
            let was = match t.slot(x, y) {
                Some(slot) => {
                    let was = *slot;
                    *slot = state;
                    was
                }
                None => return,
            };
            if state == ChunkState::Completed && was != ChunkState::Completed {
                t.chunks_completed += 1;
            }
            t.status = match state {
                ChunkState::Pending => "queued",
                ChunkState::InProgress => "downloading",
                ChunkState::Completed => "downloading",
                ChunkState::Failed => "degraded",
            }
            .to_owned();
        }
    }

    pub fn add_tile_bytes(&self, tile_id: u32, bytes: u64) {
        if let Some(tile) = self.tile(tile_id) {
            tile.lock().downloaded_bytes += bytes;
        }
    }

    /// Queue a line for the UI; dropped silently when the UI is not keeping
    /// up, which is preferable to stalling a worker.
    pub fn push_log(&self, line: String) {
        match self.log_tx.try_send(line) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn drain_log(&self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = self.log_rx.try_recv() {
            out.push(line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_lifecycle() {
        let bus = StatusBus::new();
        bus.add_pending(3);
        bus.finish_one(true);
        bus.finish_one(false);
        assert_eq!(bus.pending(), 1);
        assert_eq!(bus.done(), 1);
        assert_eq!(bus.failed(), 1);
    }

    #[test]
    fn test_chunk_grid_tracks_completion() {
        let bus = StatusBus::new();
        bus.register_tile(42, 2, 4);
        bus.set_chunk_state(42, 1, 1, ChunkState::InProgress);
        bus.set_chunk_state(42, 1, 1, ChunkState::Completed);
        bus.set_chunk_state(42, 2, 2, ChunkState::Completed);
        // Double completion does not double count.
        bus.set_chunk_state(42, 2, 2, ChunkState::Completed);
        let tile = bus.tile(42).unwrap();
        let t = tile.lock();
        assert_eq!(t.chunks_completed, 2);
        assert_eq!(t.grid[0], ChunkState::Completed);
        assert_eq!(t.grid[3], ChunkState::Completed);
        assert_eq!(t.grid[1], ChunkState::Pending);
    }

    #[test]
    fn test_log_overflow_drops_instead_of_blocking() {
        let bus = StatusBus::new();
        for i in 0..300 {
            bus.push_log(format!("line {}", i));
        }
        let drained = bus.drain_log();
        assert_eq!(drained.len(), 200);
        assert_eq!(drained[0], "line 0");
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
