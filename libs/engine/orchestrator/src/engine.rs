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

//! The application context: every subsystem wired together once at
//! startup and handed around explicitly.

use crate::{
    area::{enumerate_area, precover_level, AreaRequest, Candidate},
    config::EngineConfig,
};
use anyhow::{Context, Result};
use assembly::{AssemblyMonitor, MonitorConfig};
use cache_index::CacheIndex;
use chunk_jobs::{jobs_for_tile, precover_job};
use download::{cleanup_staging_tmp, spawn_workers, DownloadConfig, DownloadHub, Priority};
use fallback::FallbackManager;
use log::{info, warn};
use map_profile::MapServer;
use parking_lot::Mutex;
use placement::{OverwriteMode, SceneryPaths};
use status_bus::{CancelToken, StatusBus};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// A whole acquisition run gets this long before leftover work is
/// abandoned to a later session.
pub const HARD_TIMEOUT: Duration = Duration::from_secs(600);
/// How long `pending == 0` must hold before a run counts as drained.
const DRAIN_GRACE: Duration = Duration::from_secs(2);
const POLL: Duration = Duration::from_millis(250);

/// Summary of one orchestrated run.
#[derive(Clone, Debug, Default)]
pub struct JobReport {
    pub tiles_planned: usize,
    pub chunks_queued: usize,
    pub chunks_already_staged: usize,
    pub drained: bool,
}

pub struct Engine {
    cfg: EngineConfig,
    server: MapServer,
    paths: SceneryPaths,
    index: Arc<CacheIndex>,
    status: Arc<StatusBus>,
    hub: Arc<DownloadHub>,
    monitor: Arc<Mutex<AssemblyMonitor>>,
    cancel: CancelToken,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Engine {
    /// Build and start every subsystem: cache index, worker pool,
    /// fallback manager and assembly monitor.
    pub fn start(cfg: EngineConfig, server: MapServer) -> Result<Arc<Self>> {
        cfg.validate()?;
        let save_root = cfg.save.as_ref().map(PathBuf::from);
        let paths =
            SceneryPaths::with_options(Path::new(&cfg.path), save_root.as_deref(), !cfg.nosave);
        paths.ensure_trees().context("preparing scenery trees")?;

        let index = CacheIndex::open(
            paths.root(),
            paths.backup_root(),
            &paths.backup_root().join("index.json"),
            env!("CARGO_PKG_VERSION"),
        )?;

        let cancel = CancelToken::new();
        let status = Arc::new(StatusBus::new());
        let hub = DownloadHub::new(Arc::clone(&status), cancel.clone());

        let download_cfg = DownloadConfig {
            workers: cfg.workers,
            base_timeout: cfg.timeout,
            retry_timeout_cap: cfg.retry_timeout_cap,
            retry_timeout_factor: cfg.retry_timeout_factor,
            retry_backoff_base: cfg.retry_backoff_base,
            retry_max_sleep: cfg.retry_max_sleep,
            min_chunk_bytes: cfg.min_chunk_bytes,
            proxy: cfg.proxy.clone().or_else(|| server.proxy.clone()),
            ..DownloadConfig::default()
        };
        let mut handles = spawn_workers(&hub, &server, &download_cfg)?;

        let monitor = Arc::new(Mutex::new(AssemblyMonitor::new(
            &paths,
            Arc::clone(&index),
            Arc::clone(&status),
            MonitorConfig {
                interval: Duration::from_secs(cfg.monitor_interval.max(1)),
                min_chunk_bytes: cfg.min_chunk_bytes,
                prefer_png: cfg.png,
                overwrite: OverwriteMode::from_flag(cfg.over)?,
                ..MonitorConfig::default()
            },
        )));
        handles.push(AssemblyMonitor::spawn(Arc::clone(&monitor), cancel.clone()));

        let fb = FallbackManager::new(
            Arc::clone(&hub),
            Arc::clone(&index),
            paths.clone(),
            cfg.attempts,
            true,
        );
        handles.push(fb.spawn(cancel.clone()));
        handles.push(index.spawn_rescan(Duration::from_secs(120), cancel.clone()));

        info!(
            "engine started: {} workers, map server '{}', root {}",
            cfg.workers,
            server.name,
            paths.root().display()
        );
        Ok(Arc::new(Self {
            cfg,
            server,
            paths,
            index,
            status,
            hub,
            monitor,
            cancel,
            handles: Mutex::new(handles),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn server(&self) -> &MapServer {
        &self.server
    }

    pub fn paths(&self) -> &SceneryPaths {
        &self.paths
    }

    pub fn index(&self) -> &Arc<CacheIndex> {
        &self.index
    }

    pub fn status(&self) -> &Arc<StatusBus> {
        &self.status
    }

    pub fn hub(&self) -> &Arc<DownloadHub> {
        &self.hub
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Acquire one circular area. Blocks until the work drains or the
    /// hard timeout fires; leftover jobs stay queued for the next run.
    pub fn run_area(&self, req: AreaRequest) -> Result<JobReport> {
        self.run_with(req, &self.cfg, HARD_TIMEOUT)
    }

    pub fn run_area_with_timeout(&self, req: AreaRequest, hard_timeout: Duration) -> Result<JobReport> {
        self.run_with(req, &self.cfg, hard_timeout)
    }

    /// The same run with per-job overrides of the planning options
    /// (radius, classes, priority split). Placement policy stays as the
    /// engine was started.
    pub fn run_area_custom(&self, req: AreaRequest, cfg: EngineConfig) -> Result<JobReport> {
        cfg.validate()?;
        self.run_with(req, &cfg, HARD_TIMEOUT)
    }

    fn run_with(
        &self,
        req: AreaRequest,
        cfg: &EngineConfig,
        hard_timeout: Duration,
    ) -> Result<JobReport> {
        let started = Instant::now();
        let candidates = enumerate_area(&req, cfg, |id, size| {
            self.index.is_satisfied(id, size)
        });
        let mut report = JobReport {
            tiles_planned: candidates.len(),
            ..JobReport::default()
        };
        if candidates.is_empty() {
            info!("area already satisfied; nothing to do");
            report.drained = true;
            return Ok(report);
        }
        info!(
            "acquiring {} tiles around {:.4},{:.4} (radius {} nm)",
            candidates.len(),
            req.lat,
            req.lon,
            req.radius_nm
        );

        // Phase 1: one coarse chunk per tile on the priority lane, giving
        // the area full (if blurry) coverage as fast as possible.
        let level = precover_level(&candidates, cfg.precover_gap);
        for c in &candidates {
            if c.meta.size_id == level {
                // The high-res phase will stage this exact chunk.
                continue;
            }
            if let Some(job) = precover_job(&c.meta, level, self.paths.staging(), cfg.attempts)? {
                self.status.register_tile(job.tile_id, 1, 1);
                self.hub.submit(job, Priority::High);
                report.chunks_queued += 1;
            }
        }

        // Phase 2: the full-resolution grids. In direction-aware mode the
        // nearest share of the ordered list rides the priority lane.
        let high_cut = match req.heading_deg {
            Some(_) => (candidates.len() as f64 * cfg.daa_priority_frac).ceil() as usize,
            None => 0,
        };
        for (rank, c) in candidates.iter().enumerate() {
            let planned = jobs_for_tile(&c.meta, self.paths.staging(), cfg.attempts)?;
            self.status
                .register_tile(c.meta.id.raw(), c.meta.cols, c.meta.cols * c.meta.cols);
            report.chunks_queued += planned.jobs.len();
            report.chunks_already_staged += planned.already_staged as usize;
            let class = if rank < high_cut {
                Priority::High
            } else {
                Priority::Low
            };
            for job in planned.jobs {
                self.hub.submit(job, class);
            }
        }

        report.drained = self.wait_for_drain(started, hard_timeout, &candidates);
        Ok(report)
    }

    /// Acquire along a list of waypoints, one area per point.
    pub fn run_route(&self, waypoints: &[(f64, f64)], alt_ft: f64) -> Result<Vec<JobReport>> {
        let mut reports = Vec::with_capacity(waypoints.len());
        for &(lat, lon) in waypoints {
            if self.cancel.is_cancelled() {
                break;
            }
            reports.push(self.run_area(AreaRequest {
                lat,
                lon,
                radius_nm: self.cfg.radius,
                heading_deg: None,
                alt_ft,
            })?);
        }
        Ok(reports)
    }

    /// Acquire every tile of an explicit bounding box; used by the
    /// fill-holes control endpoint.
    pub fn run_bbox(&self, north: f64, south: f64, east: f64, west: f64) -> Result<JobReport> {
        self.run_bbox_custom(north, south, east, west, self.cfg.clone())
    }

    pub fn run_bbox_custom(
        &self,
        north: f64,
        south: f64,
        east: f64,
        west: f64,
        mut cfg: EngineConfig,
    ) -> Result<JobReport> {
        let lat = (north + south) / 2.0;
        let lon = (east + west) / 2.0;
        // A circle that circumscribes the box.
        cfg.radius = (tile_grid::surface_distance_nm(west, south, east, north) / 2.0).max(0.5);
        cfg.validate()?;
        self.run_with(
            AreaRequest {
                lat,
                lon,
                radius_nm: cfg.radius,
                heading_deg: None,
                alt_ft: 0.0,
            },
            &cfg,
            HARD_TIMEOUT,
        )
    }

    /// Poll until downloads drain and assembly catches up, the grace
    /// window holding throughout, or until the hard timeout.
    fn wait_for_drain(&self, started: Instant, hard_timeout: Duration, candidates: &[Candidate]) -> bool {
        let needed: Vec<u32> = candidates.iter().map(|c| c.meta.id.raw()).collect();
        let mut zero_since: Option<Instant> = None;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if started.elapsed() > hard_timeout {
                warn!(
                    "hard timeout after {:?}: {} chunks left for a later run",
                    hard_timeout,
                    self.status.pending()
                );
                return false;
            }
            if self.status.pending() == 0 {
                let since = zero_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= DRAIN_GRACE {
                    break;
                }
            } else {
                zero_since = None;
            }
            thread::sleep(POLL);
        }

        // Give the monitor passes until every achievable tile assembled
        // or progress stops.
        loop {
            let assembled_everything = {
                let monitor = self.monitor.lock();
                needed.iter().all(|id| monitor.has_assembled(*id))
            };
            if assembled_everything {
                return true;
            }
            if self.monitor.lock().scan_pass() == 0 {
                // No further progress is possible from what is staged.
                return true;
            }
        }
    }

    /// Stop every background task and scrub interrupted downloads.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        cleanup_staging_tmp(self.paths.staging());
        if let Err(e) = self.index.save() {
            warn!("final index save failed: {}", e);
        }
        info!("engine stopped");
    }
}
