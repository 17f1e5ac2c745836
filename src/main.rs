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
use anyhow::{anyhow, bail, Result};
use log::{info, LevelFilter};
use map_profile::{default_server, load_servers, select_server, MapServer};
use orchestrator::{AreaRequest, Engine, EngineConfig, IcaoResolver, JobReport};
use position_link::PositionLink;
use status_bus::{CancelToken, StatusBus};
use std::{
    collections::HashMap,
    fs,
    io::{stdout, Write},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};
use structopt::StructOpt;
use tile_grid::{SizeId, TileId, TileMetadata};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "orthos",
    about = "Download, assemble and place photoscenery tiles."
)]
struct Opt {
    /// Run the control plane and web UI instead of a one-shot job.
    #[structopt(long)]
    http: bool,

    /// Control plane port.
    #[structopt(long, default_value = "8000")]
    port: u16,

    /// Acquisition radius in nautical miles.
    #[structopt(long, default_value = "10")]
    radius: f64,

    /// Resolution class 0..=6 (512..32768 px).
    #[structopt(long, default_value = "4")]
    size: u8,

    /// Overwrite policy: 0 keep, 1 upgrade, 2 always.
    #[structopt(long, default_value = "1")]
    over: u8,

    /// Lowest class the distance-adaptive reduction may pick.
    #[structopt(long, default_value = "0")]
    sdwn: u8,

    /// Map server id from the profile list.
    #[structopt(long, default_value = "1")]
    map: u32,

    /// Map server profile list (JSON).
    #[structopt(long, parse(from_os_str))]
    map_file: Option<PathBuf>,

    /// Center the area on an airport.
    #[structopt(long)]
    icao: Option<String>,

    /// Area center latitude.
    #[structopt(long)]
    lat: Option<f64>,

    /// Area center longitude.
    #[structopt(long)]
    lon: Option<f64>,

    /// Bounding box: lower-left latitude.
    #[structopt(long)]
    latll: Option<f64>,

    /// Bounding box: lower-left longitude.
    #[structopt(long)]
    lonll: Option<f64>,

    /// Bounding box: upper-right latitude.
    #[structopt(long)]
    latur: Option<f64>,

    /// Bounding box: upper-right longitude.
    #[structopt(long)]
    lonur: Option<f64>,

    /// Acquire exactly one tile by packed id.
    #[structopt(long)]
    tile: Option<u32>,

    /// Download attempts per chunk.
    #[structopt(long, default_value = "3")]
    attempts: u32,

    /// Base per-attempt HTTP timeout in seconds.
    #[structopt(long, default_value = "10")]
    timeout: f64,

    /// HTTP proxy as ip:port.
    #[structopt(long)]
    proxy: Option<String>,

    /// Scenery root directory.
    #[structopt(long, parse(from_os_str), default_value = "Orthophotos")]
    path: PathBuf,

    /// Override the backup tree location.
    #[structopt(long, parse(from_os_str))]
    save: Option<PathBuf>,

    /// Discard displaced tiles instead of keeping backups.
    #[structopt(long)]
    nosave: bool,

    /// Emit PNG tiles instead of DDS.
    #[structopt(long)]
    png: bool,

    /// Worker pool size.
    #[structopt(long, default_value = "8")]
    workers: usize,

    /// Log verbosity: 0 warnings, 1 info, 2 debug.
    #[structopt(long, default_value = "1")]
    logger: u8,

    /// Extra debug verbosity for engine internals.
    #[structopt(long, default_value = "0")]
    debug: u8,

    /// Airport lookup table (icao,lat,lon per line).
    #[structopt(long, parse(from_os_str))]
    airports: Option<PathBuf>,

    /// Static files served at the control plane root.
    #[structopt(long, parse(from_os_str), default_value = "web")]
    web_root: PathBuf,
}

/// Lookup-table resolver; route and airport file parsing proper live
/// outside the engine.
struct FileIcaoResolver {
    table: HashMap<String, (f64, f64)>,
}

impl FileIcaoResolver {
    fn load(path: Option<&Path>) -> Self {
        let mut table = HashMap::new();
        if let Some(path) = path {
            if let Ok(raw) = fs::read_to_string(path) {
                for line in raw.lines() {
                    let mut fields = line.split(',');
                    if let (Some(code), Some(lat), Some(lon)) =
                        (fields.next(), fields.next(), fields.next())
                    {
                        if let (Ok(lat), Ok(lon)) =
                            (lat.trim().parse::<f64>(), lon.trim().parse::<f64>())
                        {
                            table.insert(code.trim().to_uppercase(), (lat, lon));
                        }
                    }
                }
            }
        }
        Self { table }
    }
}

impl IcaoResolver for FileIcaoResolver {
    fn resolve(&self, code: &str) -> Option<(f64, f64)> {
        self.table.get(&code.to_uppercase()).copied()
    }
}

fn init_logging(opt: &Opt) {
    let level = match (opt.logger, opt.debug) {
        (0, 0) => LevelFilter::Warn,
        (1, 0) => LevelFilter::Info,
        (_, 0) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn build_config(opt: &Opt) -> Result<EngineConfig> {
    let mut cfg = EngineConfig::default();
    cfg.radius = opt.radius;
    cfg.size = opt.size;
    cfg.over = opt.over;
    cfg.sdwn = opt.sdwn;
    cfg.map = opt.map;
    cfg.path = opt.path.display().to_string();
    cfg.save = opt.save.as_ref().map(|p| p.display().to_string());
    cfg.nosave = opt.nosave;
    cfg.png = opt.png;
    cfg.timeout = opt.timeout;
    cfg.attempts = opt.attempts;
    cfg.proxy = opt.proxy.clone();
    cfg.workers = opt.workers;
    cfg.validate()?;
    Ok(cfg)
}

fn pick_server(opt: &Opt) -> Result<MapServer> {
    match &opt.map_file {
        Some(path) => {
            let servers = load_servers(path)?;
            select_server(&servers, opt.map)
        }
        None => Ok(default_server()),
    }
}

/// Inline percentage meter for one-shot CLI runs.
struct ProgressMeter {
    status: Arc<StatusBus>,
}

impl ProgressMeter {
    fn spawn(status: Arc<StatusBus>, cancel: CancelToken) -> thread::JoinHandle<()> {
        let meter = Self { status };
        thread::spawn(move || {
            print!("downloading 000.00%");
            stdout().flush().ok();
            while !cancel.is_cancelled() {
                meter.draw();
                thread::sleep(Duration::from_millis(500));
            }
            meter.draw();
            println!();
        })
    }

    fn draw(&self) {
        let done = self.status.done() + self.status.failed();
        let total = done + self.status.pending();
        let percent = if total == 0 {
            100.0
        } else {
            done as f64 / total as f64 * 100.0
        };
        print!("\x1B[7D{:06.2}%", percent);
        stdout().flush().ok();
    }
}

fn one_shot(opt: &Opt, engine: &Arc<Engine>, resolver: &FileIcaoResolver) -> Result<JobReport> {
    if let Some(raw_id) = opt.tile {
        let meta = TileMetadata::from_id(TileId::from_raw(raw_id), SizeId::new(opt.size)?);
        info!(
            "single tile {} around {:.4},{:.4}",
            meta.id, meta.lat_c, meta.lon_c
        );
        return engine.run_area(AreaRequest {
            lat: meta.lat_c,
            lon: meta.lon_c,
            radius_nm: 0.1,
            heading_deg: None,
            alt_ft: 0.0,
        });
    }

    if let (Some(latll), Some(lonll), Some(latur), Some(lonur)) =
        (opt.latll, opt.lonll, opt.latur, opt.lonur)
    {
        return engine.run_bbox(latur, latll, lonur, lonll);
    }

    let (lat, lon) = match (opt.lat, opt.lon, &opt.icao) {
        (Some(lat), Some(lon), _) => (lat, lon),
        (_, _, Some(code)) => resolver
            .resolve(code)
            .ok_or_else(|| anyhow!("unknown airport code {}", code))?,
        _ => bail!("no area given: use --lat/--lon, --icao, --tile or a bounding box"),
    };
    engine.run_area(AreaRequest {
        lat,
        lon,
        radius_nm: opt.radius,
        heading_deg: None,
        alt_ft: 0.0,
    })
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    init_logging(&opt);

    let cfg = build_config(&opt)?;
    let server = pick_server(&opt)?;
    let engine = Engine::start(cfg, server)?;
    let resolver = FileIcaoResolver::load(opt.airports.as_deref());

    if opt.http {
        let position = PositionLink::new(Duration::from_secs(2));
        let state = control_plane::ControlState::new(
            Arc::clone(&engine),
            position,
            Arc::new(resolver),
            opt.web_root.clone(),
        );
        let result = control_plane::serve_blocking(state, opt.port);
        engine.shutdown();
        return result;
    }

    let meter = ProgressMeter::spawn(
        Arc::clone(engine.status()),
        engine.cancel_token().clone(),
    );
    let report = one_shot(&opt, &engine, &resolver);
    engine.shutdown();
    let _ = meter.join();

    let report = report?;
    let (files, bytes) = engine.status().session_totals();
    info!(
        "session complete: {} tiles planned, {} chunks fetched ({} bytes), drained: {}",
        report.tiles_planned, files, bytes, report.drained
    );
    if !report.drained {
        bail!("acquisition incomplete; rerun to pick up remaining work");
    }
    Ok(())
}
