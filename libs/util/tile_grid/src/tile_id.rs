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
use crate::{tile_width_deg, LAT_STEP_DEG};
use anyhow::{ensure, Result};
use std::fmt;

/// Packed scenery tile identifier.
///
/// The packing is bit-exact with the scenery tree the simulator consumes:
///   id = (lon_shifted << 14) | (lat_shifted << 6) | (y << 3) | x
/// where lon_shifted = floor(lon) + 180, lat_shifted = floor(lat) + 90,
/// y indexes the 0.125 degree latitude rows of the one-degree cell and x
/// indexes the variable-width longitude columns.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TileId(u32);

/// Everything recoverable from a packed tile id.
#[derive(Clone, Debug, PartialEq)]
pub struct TileCoords {
    pub lon_base: f64,
    pub lat_base: f64,
    pub x: u32,
    pub y: u32,
    pub lon_c: f64,
    pub lat_c: f64,
    pub lon_step: f64,
    pub dir10: String,
    pub dir1: String,
}

impl TileId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn from_lon_lat(lon: f64, lat: f64) -> Result<Self> {
        ensure!((-90.0..=90.0).contains(&lat), "latitude {} out of range", lat);
        ensure!(
            (-180.0..=180.0).contains(&lon),
            "longitude {} out of range",
            lon
        );
        // The antimeridian belongs to the western edge.
        let lon = if lon >= 180.0 { lon - 360.0 } else { lon };
        let lat = if lat >= 90.0 { 90.0 - 1e-9 } else { lat };

        let lon_floor = lon.floor();
        let lat_floor = lat.floor();
        let y = (((lat - lat_floor) / LAT_STEP_DEG).floor() as u32).min(7);
        // Tile width must agree between packing and unpacking, so evaluate
        // it at the row center rather than at the query latitude.
        let row_center = lat_floor + (y as f64 + 0.5) * LAT_STEP_DEG;
        let width = tile_width_deg(row_center);
        let x = (((lon - lon_floor) / width).floor() as u32).min(cols_in_cell(width) - 1);

        let lon_shifted = (lon_floor as i32 + 180) as u32;
        let lat_shifted = (lat_floor as i32 + 90) as u32;
        Ok(Self((lon_shifted << 14) | (lat_shifted << 6) | (y << 3) | x))
    }

    pub fn unpack(&self) -> TileCoords {
        let lon_cell = (self.0 >> 14) as i32 - 180;
        let lat_cell = ((self.0 >> 6) & 0xff) as i32 - 90;
        let y = (self.0 >> 3) & 0x7;
        let x = self.0 & 0x7;

        let row_center = lat_cell as f64 + (y as f64 + 0.5) * LAT_STEP_DEG;
        let width = tile_width_deg(row_center);
        let lon_base = lon_cell as f64 + x as f64 * width;
        let lat_base = lat_cell as f64 + y as f64 * LAT_STEP_DEG;

        TileCoords {
            lon_base,
            lat_base,
            x,
            y,
            lon_c: lon_base + width / 2.0,
            lat_c: lat_base + LAT_STEP_DEG / 2.0,
            lon_step: width,
            dir10: dir_label(lon_cell, lat_cell, 10),
            dir1: dir_label(lon_cell, lat_cell, 1),
        }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:07}", self.0)
    }
}

fn cols_in_cell(width: f64) -> u32 {
    if width >= 1.0 {
        1
    } else {
        (1.0 / width).round() as u32
    }
}

/// Scenery directory label `{e|w}DDD{n|s}DD`, with both coordinates floored
/// towards negative infinity to the given granularity before labelling.
fn dir_label(lon_cell: i32, lat_cell: i32, granularity: i32) -> String {
    let lon = (lon_cell as f64 / granularity as f64).floor() as i32 * granularity;
    let lat = (lat_cell as f64 / granularity as f64).floor() as i32 * granularity;
    let ew = if lon < 0 { 'w' } else { 'e' };
    let ns = if lat < 0 { 's' } else { 'n' };
    format!("{}{:03}{}{:02}", ew, lon.abs(), ns, lat.abs())
}
