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

//! The local control plane: a small REST surface over the engine for
//! the bundled web UI and for scripting. Binds loopback only.

mod handlers;
mod preview;

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use log::info;
use orchestrator::{Engine, IcaoResolver};
use parking_lot::Mutex;
use position_link::PositionLink;
use status_bus::CancelToken;
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Shared state behind every handler.
pub struct ControlState {
    pub engine: Arc<Engine>,
    pub position: Arc<PositionLink>,
    pub icao: Arc<dyn IcaoResolver>,
    pub static_dir: PathBuf,
    next_job_id: AtomicU64,
    completed_jobs: Mutex<Vec<u64>>,
    position_session: Mutex<Option<CancelToken>>,
}

impl ControlState {
    pub fn new(
        engine: Arc<Engine>,
        position: Arc<PositionLink>,
        icao: Arc<dyn IcaoResolver>,
        static_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            position,
            icao,
            static_dir,
            next_job_id: AtomicU64::new(1),
            completed_jobs: Mutex::new(Vec::new()),
            position_session: Mutex::new(None),
        })
    }

    pub(crate) fn allocate_job_id(&self) -> u64 {
        self.next_job_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn finish_job(&self, job_id: u64) {
        self.completed_jobs.lock().push(job_id);
    }

    pub(crate) fn drain_completed(&self) -> Vec<u64> {
        self.completed_jobs.lock().drain(..).collect()
    }

    pub(crate) fn begin_position_session(&self) -> CancelToken {
        let mut slot = self.position_session.lock();
        if let Some(old) = slot.take() {
            old.cancel();
        }
        let token = CancelToken::new();
        *slot = Some(token.clone());
        token
    }

    pub(crate) fn end_position_session(&self) {
        if let Some(token) = self.position_session.lock().take() {
            token.cancel();
        }
    }
}

fn router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/api/session-info", get(handlers::session_info))
        .route("/api/connection-state", get(handlers::connection_state))
        .route("/api/connect", post(handlers::connect))
        .route("/api/disconnect", post(handlers::disconnect))
        .route("/api/fgfs-status", get(handlers::fgfs_status))
        .route("/api/start-job", post(handlers::start_job))
        .route("/api/fill-holes", post(handlers::fill_holes))
        .route("/api/completed-jobs", get(handlers::completed_jobs))
        .route("/api/queue-size", get(handlers::queue_size))
        .route("/api/coverage", get(handlers::coverage))
        .route("/api/resolve-icao", get(handlers::resolve_icao))
        .route("/api/shutdown", post(handlers::shutdown))
        .route("/preview", get(preview::preview))
        .fallback(handlers::static_files)
        .layer(Extension(state))
}

/// Serve until the engine's cancellation token fires (the shutdown
/// endpoint, a signal handler, or a fatal error elsewhere).
pub fn serve_blocking(state: Arc<ControlState>, port: u16) -> Result<()> {
    let cancel = state.engine.cancel_token().clone();
    let app = router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("building control plane runtime")?;
    runtime.block_on(async move {
        let server = axum::Server::try_bind(&addr)
            .with_context(|| format!("binding control port {}", addr))?
            .serve(app.into_make_service());
        info!("control plane listening on http://{}", addr);
        server
            .with_graceful_shutdown(async move {
                while !cancel.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
            .await
            .context("control plane server")
    })
}
