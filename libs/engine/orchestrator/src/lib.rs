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
mod area;
mod config;
mod engine;

pub use area::{enumerate_area, precover_level, AreaRequest, Candidate};
pub use config::{AcquireMode, EngineConfig};
pub use engine::{Engine, JobReport, HARD_TIMEOUT};

/// Resolving airport codes to coordinates is an external concern; the
/// engine only fixes the call signature.
pub trait IcaoResolver: Send + Sync {
    fn resolve(&self, code: &str) -> Option<(f64, f64)>;
}
