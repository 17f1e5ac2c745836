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

//! Client for the simulator's property telnet service. Polls position,
//! orientation and velocity property dumps on an interval and publishes
//! a snapshot the orchestrator can bias acquisition with.

mod parse;

pub use parse::parse_property;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use status_bus::CancelToken;
use std::{
    io::{BufRead, BufReader, Write},
    net::TcpStream,
    sync::Arc,
    thread,
    time::Duration,
};

/// Reconnect attempts wait at least this long.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const KNOTS_TO_MPH: f64 = 1.150_78;

/// One complete telemetry reading.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub altitude_msl_ft: f64,
    pub ground_elevation_ft: f64,
    pub heading_deg: f64,
    pub speed_mph: f64,
}

impl Snapshot {
    /// Height above ground, floored at zero.
    pub fn agl_ft(&self) -> f64 {
        (self.altitude_msl_ft - self.ground_elevation_ft).max(0.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

pub struct PositionLink {
    snapshot: Mutex<Option<Snapshot>>,
    state: Mutex<LinkState>,
    interval: Duration,
}

impl PositionLink {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(None),
            state: Mutex::new(LinkState::Disconnected),
            interval,
        })
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        *self.snapshot.lock()
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }

    /// Maintain a polling connection to 127.0.0.1:port until cancelled.
    /// Disconnection clears the snapshot and retries with backoff.
    pub fn spawn(self: &Arc<Self>, port: u16, cancel: CancelToken) -> thread::JoinHandle<()> {
        let link = Arc::clone(self);
        thread::Builder::new()
            .name("position-link".to_owned())
            .spawn(move || {
                while !cancel.is_cancelled() {
                    link.set_state(LinkState::Connecting);
                    match link.session(port, &cancel) {
                        Ok(()) => return, // cancelled mid-session
                        Err(e) => {
                            warn!("telemetry link lost: {}", e);
                            *link.snapshot.lock() = None;
                            link.set_state(LinkState::Disconnected);
                        }
                    }
                    // Backoff in small steps so cancellation stays prompt.
                    let mut waited = Duration::from_secs(0);
                    while waited < RECONNECT_BACKOFF && !cancel.is_cancelled() {
                        thread::sleep(Duration::from_millis(250));
                        waited += Duration::from_millis(250);
                    }
                }
                link.set_state(LinkState::Disconnected);
            })
            .expect("spawning position link thread")
    }

    /// One connected session; returns Err on any I/O problem.
    fn session(&self, port: u16, cancel: &CancelToken) -> Result<()> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .with_context(|| format!("connecting to simulator on port {}", port))?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut stream = stream;
        info!("telemetry link established on port {}", port);
        self.set_state(LinkState::Connected);

        while !cancel.is_cancelled() {
            let position = dump(&mut stream, &mut reader, "/position")?;
            let orientation = dump(&mut stream, &mut reader, "/orientation")?;
            let velocities = dump(&mut stream, &mut reader, "/velocities")?;

            let snapshot = Snapshot {
                lat_deg: parse_property(&position, "latitude-deg").unwrap_or(0.0),
                lon_deg: parse_property(&position, "longitude-deg").unwrap_or(0.0),
                altitude_msl_ft: parse_property(&position, "altitude-ft").unwrap_or(0.0),
                ground_elevation_ft: parse_property(&position, "ground-elev-ft").unwrap_or(0.0),
                heading_deg: parse_property(&orientation, "heading-deg").unwrap_or(0.0),
                speed_mph: parse_property(&velocities, "groundspeed-kt").unwrap_or(0.0)
                    * KNOTS_TO_MPH,
            };
            debug!(
                "telemetry: {:.4} {:.4} at {:.0} ft, heading {:.0}",
                snapshot.lat_deg, snapshot.lon_deg, snapshot.altitude_msl_ft, snapshot.heading_deg
            );
            *self.snapshot.lock() = Some(snapshot);

            let mut waited = Duration::from_secs(0);
            while waited < self.interval && !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(100));
                waited += Duration::from_millis(100);
            }
        }
        Ok(())
    }
}

/// Issue one `dump` command and read the full property listing. The
/// response may arrive fragmented, so accumulate lines until the closing
/// tag shows up.
fn dump(stream: &mut TcpStream, reader: &mut BufReader<TcpStream>, node: &str) -> Result<String> {
    stream
        .write_all(format!("dump {}\r\n", node).as_bytes())
        .context("writing dump command")?;
    let mut body = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).context("reading dump response")?;
        if n == 0 {
            anyhow::bail!("connection closed mid-response");
        }
        body.push_str(&line);
        if body.contains("</PropertyList>") {
            return Ok(body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agl_floors_at_zero() {
        let mut snap = Snapshot {
            lat_deg: 47.0,
            lon_deg: 11.0,
            altitude_msl_ft: 3000.0,
            ground_elevation_ft: 1900.0,
            heading_deg: 90.0,
            speed_mph: 120.0,
        };
        assert!((snap.agl_ft() - 1100.0).abs() < 1e-9);
        snap.ground_elevation_ft = 3200.0;
        assert_eq!(snap.agl_ft(), 0.0);
    }

    #[test]
    fn test_link_state_labels() {
        assert_eq!(LinkState::Disconnected.as_str(), "disconnected");
        assert_eq!(LinkState::Connecting.as_str(), "connecting");
        assert_eq!(LinkState::Connected.as_str(), "connected");
    }
}
