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
use crate::{attempt_timeout, backoff_sleep, DownloadConfig, DownloadHub};
use anyhow::Result;
use chunk_jobs::ChunkJob;
use crossbeam::select;
use log::{debug, trace, warn};
use map_profile::MapServer;
use reqwest::blocking::Client;
use status_bus::ChunkState;
use std::{fs, sync::Arc, thread, time::Duration};

/// How long an idle worker waits on the queues before re-checking the
/// cancellation token.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Start the worker pool. Threads run until the hub's token is cancelled
/// or both channels close.
pub fn spawn_workers(
    hub: &Arc<DownloadHub>,
    server: &MapServer,
    cfg: &DownloadConfig,
) -> Result<Vec<thread::JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(cfg.workers);
    for worker_id in 0..cfg.workers {
        let hub = Arc::clone(hub);
        let server = server.clone();
        let cfg = cfg.clone();
        let client = build_client(&cfg)?;
        handles.push(
            thread::Builder::new()
                .name(format!("download-{}", worker_id))
                .spawn(move || worker_loop(&hub, &client, &server, &cfg))?,
        );
    }
    Ok(handles)
}

fn build_client(cfg: &DownloadConfig) -> Result<Client> {
    // Redirects are followed by hand so the hop count and the Location
    // semantics stay under our control.
    let mut builder = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(cfg.user_agent.clone());
    if let Some(proxy) = &cfg.proxy {
        builder = builder.proxy(reqwest::Proxy::all(format!("http://{}", proxy))?);
    }
    Ok(builder.build()?)
}

fn worker_loop(hub: &Arc<DownloadHub>, client: &Client, server: &MapServer, cfg: &DownloadConfig) {
    loop {
        if hub.cancel_token().is_cancelled() {
            return;
        }
        // HIGH strictly preempts LOW: drain it non-blocking before ever
        // considering the bulk queue.
        let job = match hub.high_rx().try_recv() {
            Ok(job) => job,
            Err(_) => {
                select! {
                    recv(hub.high_rx()) -> job => match job {
                        Ok(job) => job,
                        Err(_) => return,
                    },
                    recv(hub.low_rx()) -> job => match job {
                        Ok(job) => job,
                        Err(_) => return,
                    },
                    default(IDLE_POLL) => continue,
                }
            }
        };
        process_job(hub, client, server, cfg, job);
    }
}

enum FetchOutcome {
    Body(Vec<u8>),
    /// 404, 410, 500: the server will never produce this chunk.
    Definitive(u16),
    /// Everything retryable: timeouts, throttling, 5xx hiccups.
    Transient(String),
}

fn fetch(client: &Client, url: &str, timeout: Duration, max_redirects: usize) -> FetchOutcome {
    let mut target = url.to_owned();
    for hop in 0..=max_redirects {
        let response = match client.get(&target).timeout(timeout).send() {
            Ok(r) => r,
            Err(e) => return FetchOutcome::Transient(format!("request error: {}", e)),
        };
        let status = response.status();
        if status.is_success() {
            return match response.bytes() {
                Ok(b) => FetchOutcome::Body(b.to_vec()),
                Err(e) => FetchOutcome::Transient(format!("body read: {}", e)),
            };
        }
        match status.as_u16() {
            301 | 302 => {
                match response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    Some(location) => {
                        trace!("redirect hop {}: {}", hop + 1, location);
                        target = absolutize(&target, location);
                    }
                    None => {
                        return FetchOutcome::Transient("redirect without location".to_owned())
                    }
                }
            }
            code @ (404 | 410 | 500) => return FetchOutcome::Definitive(code),
            code => return FetchOutcome::Transient(format!("http {}", code)),
        }
    }
    FetchOutcome::Transient("too many redirects".to_owned())
}

/// Resolve a Location header against the URL that produced it. Absolute
/// URLs pass through; server-relative ones keep the original authority.
fn absolutize(current: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_owned();
    }
    if let Some(scheme_end) = current.find("://") {
        let after_scheme = scheme_end + 3;
        let authority_end = current[after_scheme..]
            .find('/')
            .map(|i| after_scheme + i)
            .unwrap_or(current.len());
        return format!("{}{}", &current[..authority_end], location);
    }
    location.to_owned()
}

fn process_job(
    hub: &Arc<DownloadHub>,
    client: &Client,
    server: &MapServer,
    cfg: &DownloadConfig,
    job: ChunkJob,
) {
    hub.status()
        .set_chunk_state(job.tile_id, job.x, job.y, ChunkState::InProgress);

    // A previous run may have staged this chunk already.
    if staged_is_valid(&job, cfg) {
        debug!("chunk {} already staged", job.staging_path.display());
        hub.report_completed(&job, 0);
        return;
    }

    let url = server.render(
        job.bbox.lon_ll,
        job.bbox.lat_ll,
        job.bbox.lon_ur,
        job.bbox.lat_ur,
        job.width_px,
        job.height_px,
    );
    let timeout = attempt_timeout(cfg, job.attempt_index());
    trace!("fetching {} (timeout {:?})", url, timeout);

    match fetch(client, &url, timeout, cfg.max_redirects) {
        FetchOutcome::Body(body) => match persist_chunk(&job, &body, cfg) {
            Ok(()) => {
                hub.status().push_log(format!(
                    "chunk {} ok ({} bytes)",
                    job.staging_path.display(),
                    body.len()
                ));
                hub.report_completed(&job, body.len() as u64);
            }
            Err(reason) => {
                debug!("chunk {} invalid: {}", job.staging_path.display(), reason);
                transient_failure(hub, cfg, job, &reason);
            }
        },
        FetchOutcome::Definitive(code) => {
            warn!("chunk {} failed definitively: http {}", job.staging_path.display(), code);
            hub.report_permanent(&job);
        }
        FetchOutcome::Transient(reason) => transient_failure(hub, cfg, job, &reason),
    }
}

fn transient_failure(hub: &Arc<DownloadHub>, cfg: &DownloadConfig, mut job: ChunkJob, reason: &str) {
    if job.retries_left <= 1 {
        warn!(
            "chunk {} out of retries ({})",
            job.staging_path.display(),
            reason
        );
        hub.report_permanent(&job);
        return;
    }
    let sleep = backoff_sleep(cfg, job.attempt_index());
    debug!(
        "chunk {} transient ({}); retrying in {:?}",
        job.staging_path.display(),
        reason,
        sleep
    );
    thread::sleep(sleep);
    job.retries_left -= 1;
    if !hub.cancel_token().is_cancelled() {
        hub.resubmit(job);
    }
}

/// True when the staging file already holds a plausible chunk.
fn staged_is_valid(job: &ChunkJob, cfg: &DownloadConfig) -> bool {
    let meta = match fs::metadata(&job.staging_path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if meta.len() < cfg.min_chunk_bytes {
        return false;
    }
    let mut head = [0u8; 33];
    let ok = fs::File::open(&job.staging_path)
        .and_then(|mut f| {
            use std::io::Read;
            f.read(&mut head)
        })
        .map(|n| dxt1::png::is_structurally_png(&head[..n]))
        .unwrap_or(false);
    ok
}

/// Validate the body, write it atomically, and confirm it decodes.
fn persist_chunk(job: &ChunkJob, body: &[u8], cfg: &DownloadConfig) -> Result<(), String> {
    if (body.len() as u64) < cfg.min_chunk_bytes {
        return Err(format!("undersized body ({} bytes)", body.len()));
    }
    if !dxt1::png::is_structurally_png(body) {
        return Err("body is not a png".to_owned());
    }
    let tmp = tmp_path(&job.staging_path);
    fs::write(&tmp, body).map_err(|e| format!("staging write: {}", e))?;
    if let Err(e) = fs::rename(&tmp, &job.staging_path) {
        let _ = fs::remove_file(&tmp);
        return Err(format!("staging rename: {}", e));
    }
    // The mosaic pass must be able to decode this later; find out now.
    if let Err(e) = image::open(&job.staging_path) {
        let _ = fs::remove_file(&job.staging_path);
        return Err(format!("decode check: {}", e));
    }
    Ok(())
}

fn tmp_path(staging_path: &std::path::Path) -> std::path::PathBuf {
    let mut os = staging_path.as_os_str().to_owned();
    os.push(".tmp");
    std::path::PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("http://a.example/x/y", "/z"),
            "http://a.example/z"
        );
        assert_eq!(
            absolutize("http://a.example/x", "http://b.example/y"),
            "http://b.example/y"
        );
        assert_eq!(
            absolutize("https://a.example", "/tile.png"),
            "https://a.example/tile.png"
        );
    }

    #[test]
    fn test_tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path(std::path::Path::new("/s/123_0_1_1_1.png")),
            std::path::PathBuf::from("/s/123_0_1_1_1.png.tmp")
        );
    }
}
