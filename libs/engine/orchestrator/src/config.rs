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

//! The enumerated engine configuration. Every option is a named field;
//! unknown keys in a config document are rejected rather than ignored,
//! which catches typos before they silently change a session.

use anyhow::{ensure, Result};
use serde::Deserialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquireMode {
    /// Fixed area around a chosen center.
    Manual,
    /// Direction-aware acquisition biased along the current heading.
    Daa,
}

fn default_radius() -> f64 {
    10.0
}
fn default_size() -> u8 {
    4
}
fn default_over() -> u8 {
    1
}
fn default_map() -> u32 {
    1
}
fn default_path() -> String {
    "Orthophotos".to_owned()
}
fn default_timeout() -> f64 {
    10.0
}
fn default_attempts() -> u32 {
    3
}
fn default_mode() -> AcquireMode {
    AcquireMode::Manual
}
fn default_workers() -> usize {
    8
}
fn default_precover_gap() -> u8 {
    2
}
fn default_priority_frac() -> f64 {
    0.35
}
fn default_monitor_interval() -> u64 {
    2
}
fn default_min_chunk_bytes() -> u64 {
    1024
}
fn default_backoff_base() -> f64 {
    2.0
}
fn default_max_sleep() -> f64 {
    30.0
}
fn default_timeout_cap() -> f64 {
    60.0
}
fn default_timeout_factor() -> f64 {
    1.5
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Acquisition radius in nautical miles.
    #[serde(default = "default_radius")]
    pub radius: f64,
    /// Base resolution class, 0..=6.
    #[serde(default = "default_size")]
    pub size: u8,
    /// Overwrite policy at placement, 0..=2.
    #[serde(default = "default_over")]
    pub over: u8,
    /// Minimum class the adaptive reduction may reach.
    #[serde(default)]
    pub sdwn: u8,
    /// Map server id from the profile list.
    #[serde(default = "default_map")]
    pub map: u32,
    /// Scenery root directory.
    #[serde(default = "default_path")]
    pub path: String,
    /// Override for the backup tree location.
    #[serde(default)]
    pub save: Option<String>,
    /// Disable the backup tree entirely.
    #[serde(default)]
    pub nosave: bool,
    /// Emit PNG tiles instead of DDS.
    #[serde(default)]
    pub png: bool,
    /// Base per-attempt HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Download attempts per chunk.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Optional `ip:port` HTTP proxy.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: AcquireMode,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Classes below the area minimum used for the pre-coverage pass.
    #[serde(default = "default_precover_gap")]
    pub precover_gap: u8,
    /// Share of the ordered tile list fed to the HIGH lane in daa mode.
    #[serde(default = "default_priority_frac")]
    pub daa_priority_frac: f64,
    /// Assembly monitor poll interval in seconds.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: u64,
    #[serde(default = "default_min_chunk_bytes")]
    pub min_chunk_bytes: u64,
    #[serde(default = "default_backoff_base")]
    pub retry_backoff_base: f64,
    #[serde(default = "default_max_sleep")]
    pub retry_max_sleep: f64,
    #[serde(default = "default_timeout_cap")]
    pub retry_timeout_cap: f64,
    #[serde(default = "default_timeout_factor")]
    pub retry_timeout_factor: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults are complete")
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.radius > 0.0, "radius must be positive");
        ensure!(self.size <= 6, "size {} not in 0..=6", self.size);
        ensure!(self.over <= 2, "over {} not in 0..=2", self.over);
        ensure!(self.sdwn <= 6, "sdwn {} not in 0..=6", self.sdwn);
        ensure!(self.sdwn <= self.size, "sdwn {} above size {}", self.sdwn, self.size);
        ensure!(self.attempts >= 1, "attempts must be at least 1");
        ensure!(self.workers >= 1, "workers must be at least 1");
        ensure!(
            (0.0..=1.0).contains(&self.daa_priority_frac),
            "daa_priority_frac {} not in 0..=1",
            self.daa_priority_frac
        );
        ensure!(self.timeout > 0.0, "timeout must be positive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.size, 4);
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.mode, AcquireMode::Manual);
        assert!((cfg.daa_priority_frac - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_keys_are_errors() {
        let err = EngineConfig::from_json(r#"{"radius": 5.0, "radiuss": 6.0}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_mode_parsing() {
        let cfg = EngineConfig::from_json(r#"{"mode": "daa"}"#).unwrap();
        assert_eq!(cfg.mode, AcquireMode::Daa);
        assert!(EngineConfig::from_json(r#"{"mode": "automatic"}"#).is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(EngineConfig::from_json(r#"{"size": 7}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"over": 3}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"radius": -2.0}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"size": 2, "sdwn": 4}"#).is_err());
    }
}
