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
use crate::ControlState;
use axum::{
    extract::{Extension, Query},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use log::{info, warn};
use orchestrator::AreaRequest;
use serde::Deserialize;
use serde_json::json;
use std::{path::Component, sync::Arc, thread};

pub(crate) async fn session_info(Extension(state): Extension<Arc<ControlState>>) -> Response {
    let start = state
        .engine
        .status()
        .session_start()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    Json(json!({ "startTime": start })).into_response()
}

pub(crate) async fn connection_state(Extension(state): Extension<Arc<ControlState>>) -> Response {
    Json(json!({ "state": state.position.state().as_str() })).into_response()
}

#[derive(Deserialize)]
pub(crate) struct ConnectBody {
    port: u16,
}

pub(crate) async fn connect(
    Extension(state): Extension<Arc<ControlState>>,
    Json(body): Json<ConnectBody>,
) -> Response {
    let token = state.begin_position_session();
    state.position.spawn(body.port, token);
    info!("telemetry session requested on port {}", body.port);
    StatusCode::OK.into_response()
}

pub(crate) async fn disconnect(Extension(state): Extension<Arc<ControlState>>) -> Response {
    state.end_position_session();
    StatusCode::OK.into_response()
}

pub(crate) async fn fgfs_status(Extension(state): Extension<Arc<ControlState>>) -> Response {
    match state.position.snapshot() {
        Some(snap) => Json(json!({
            "active": true,
            "lat": snap.lat_deg,
            "lon": snap.lon_deg,
            "heading": snap.heading_deg,
            "altitude": snap.altitude_msl_ft,
            "speed": snap.speed_mph,
        }))
        .into_response(),
        None => Json(json!({
            "active": false,
            "lat": 0.0,
            "lon": 0.0,
            "heading": 0.0,
            "altitude": 0.0,
            "speed": 0.0,
        }))
        .into_response(),
    }
}

#[derive(Deserialize)]
pub(crate) struct StartJobBody {
    lat: Option<f64>,
    lon: Option<f64>,
    icao: Option<String>,
    radius: Option<f64>,
    size: Option<u8>,
    over: Option<u8>,
    sdwn: Option<u8>,
    mode: Option<String>,
}

pub(crate) async fn start_job(
    Extension(state): Extension<Arc<ControlState>>,
    Json(body): Json<StartJobBody>,
) -> Response {
    let (lat, lon) = match (body.lat, body.lon, &body.icao) {
        (Some(lat), Some(lon), _) => (lat, lon),
        (_, _, Some(code)) => match state.icao.resolve(code) {
            Some(pos) => (pos.0, pos.1),
            None => {
                return (StatusCode::NOT_FOUND, format!("unknown icao {}", code))
                    .into_response()
            }
        },
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                "need lat/lon or icao".to_owned(),
            )
                .into_response()
        }
    };

    let mut cfg = state.engine.config().clone();
    if let Some(radius) = body.radius {
        cfg.radius = radius;
    }
    if let Some(size) = body.size {
        cfg.size = size;
        cfg.sdwn = cfg.sdwn.min(size);
    }
    if let Some(sdwn) = body.sdwn {
        cfg.sdwn = sdwn;
    }
    if let Some(over) = body.over {
        if over != cfg.over {
            // Placement policy is fixed when the engine starts.
            warn!("per-job overwrite mode {} ignored (engine uses {})", over, cfg.over);
        }
    }
    if let Err(e) = cfg.validate() {
        return (StatusCode::BAD_REQUEST, format!("{}", e)).into_response();
    }

    // Direction-aware jobs take heading and altitude from the live link.
    let daa = body.mode.as_deref() == Some("daa");
    let snapshot = state.position.snapshot();
    let (heading, alt_ft) = match (daa, snapshot) {
        (true, Some(snap)) => (Some(snap.heading_deg), snap.agl_ft()),
        (true, None) => {
            return (
                StatusCode::BAD_REQUEST,
                "daa mode needs a connected simulator".to_owned(),
            )
                .into_response()
        }
        (false, snap) => (None, snap.map(|s| s.agl_ft()).unwrap_or(0.0)),
    };

    let job_id = state.allocate_job_id();
    let request = AreaRequest {
        lat,
        lon,
        radius_nm: cfg.radius,
        heading_deg: heading,
        alt_ft,
    };
    let radius = cfg.radius;
    let worker_state = Arc::clone(&state);
    thread::Builder::new()
        .name(format!("job-{}", job_id))
        .spawn(move || {
            if let Err(e) = worker_state.engine.run_area_custom(request, cfg) {
                warn!("job {} failed: {}", job_id, e);
            }
            worker_state.finish_job(job_id);
        })
        .ok();

    Json(json!({ "jobId": job_id, "lat": lat, "lon": lon, "radius": radius })).into_response()
}

#[derive(Deserialize)]
pub(crate) struct FillBounds {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

#[derive(Deserialize)]
pub(crate) struct FillSettings {
    size: Option<u8>,
    #[allow(dead_code)]
    over: Option<u8>,
    sdwn: Option<u8>,
}

#[derive(Deserialize)]
pub(crate) struct FillHolesBody {
    bounds: FillBounds,
    settings: FillSettings,
}

pub(crate) async fn fill_holes(
    Extension(state): Extension<Arc<ControlState>>,
    Json(body): Json<FillHolesBody>,
) -> Response {
    let mut cfg = state.engine.config().clone();
    if let Some(size) = body.settings.size {
        cfg.size = size;
        cfg.sdwn = cfg.sdwn.min(size);
    }
    if let Some(sdwn) = body.settings.sdwn {
        cfg.sdwn = sdwn;
    }
    if let Err(e) = cfg.validate() {
        return (StatusCode::BAD_REQUEST, format!("{}", e)).into_response();
    }
    if body.bounds.north <= body.bounds.south {
        return (StatusCode::BAD_REQUEST, "empty bounds".to_owned()).into_response();
    }

    let job_id = state.allocate_job_id();
    let worker_state = Arc::clone(&state);
    let b = body.bounds;
    thread::Builder::new()
        .name(format!("job-{}", job_id))
        .spawn(move || {
            if let Err(e) = worker_state
                .engine
                .run_bbox_custom(b.north, b.south, b.east, b.west, cfg)
            {
                warn!("fill-holes job {} failed: {}", job_id, e);
            }
            worker_state.finish_job(job_id);
        })
        .ok();

    Json(json!({ "status": "started", "jobId": job_id })).into_response()
}

pub(crate) async fn completed_jobs(Extension(state): Extension<Arc<ControlState>>) -> Response {
    Json(state.drain_completed()).into_response()
}

pub(crate) async fn queue_size(Extension(state): Extension<Arc<ControlState>>) -> Response {
    Json(state.engine.hub().queue_len()).into_response()
}

pub(crate) async fn coverage(Extension(state): Extension<Arc<ControlState>>) -> Response {
    Json(state.engine.index().coverage()).into_response()
}

#[derive(Deserialize)]
pub(crate) struct IcaoQuery {
    icao: String,
}

pub(crate) async fn resolve_icao(
    Extension(state): Extension<Arc<ControlState>>,
    Query(query): Query<IcaoQuery>,
) -> Response {
    match state.icao.resolve(&query.icao) {
        Some((lat, lon)) => Json(json!({ "lat": lat, "lon": lon })).into_response(),
        None => (StatusCode::NOT_FOUND, format!("unknown icao {}", query.icao)).into_response(),
    }
}

pub(crate) async fn shutdown(Extension(state): Extension<Arc<ControlState>>) -> Response {
    info!("shutdown requested over the control plane");
    state.engine.cancel_token().cancel();
    StatusCode::OK.into_response()
}

fn mime_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

pub(crate) async fn static_files(
    Extension(state): Extension<Arc<ControlState>>,
    uri: Uri,
) -> Response {
    let rel = uri.path().trim_start_matches('/');
    let rel = if rel.is_empty() { "index.html" } else { rel };
    let candidate = state.static_dir.join(rel);
    // Never serve outside the static tree.
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return StatusCode::NOT_FOUND.into_response();
    }
    match std::fs::read(&candidate) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime_for(rel))],
            body,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_for("index.html"), "text/html");
        assert_eq!(mime_for("app/main.js"), "application/javascript");
        assert_eq!(mime_for("noextension"), "application/octet-stream");
    }
}
