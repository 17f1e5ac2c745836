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
mod lod;
mod metadata;
mod tile_id;

pub use lod::{adaptive_size_id, ellipse_metric_nm};
pub use metadata::{BBox, TileMetadata};
pub use tile_id::{TileCoords, TileId};

use anyhow::{ensure, Result};

/// Latitudinal extent of every tile, in degrees. The longitudinal extent
/// varies with latitude; see [tile_width_deg].
pub const LAT_STEP_DEG: f64 = 0.125;

/// Mean earth radius used when a local radius is not wanted.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const WGS84_A_M: f64 = 6_378_137.0;
const WGS84_B_M: f64 = 6_356_752.314_245;

pub const METERS_PER_NM: f64 = 1_852.0;

/// Discrete resolution class. Maps onto the pixel width of the final
/// assembled tile and onto the chunk subdivision of the download grid.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SizeId(u8);

impl SizeId {
    pub const MIN: SizeId = SizeId(0);
    pub const MAX: SizeId = SizeId(6);

    pub fn new(raw: u8) -> Result<Self> {
        ensure!(raw <= 6, "size id {} out of range 0..=6", raw);
        Ok(Self(raw))
    }

    /// Clamp an arbitrary signed level into the valid range.
    pub fn clamped(raw: i32) -> Self {
        Self(raw.max(0).min(6) as u8)
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    /// Pixel width of the assembled tile for this class.
    pub fn width_px(&self) -> u32 {
        512u32 << self.0
    }

    /// Number of chunks per side the download grid uses for this class.
    pub fn chunk_cols(&self) -> u32 {
        match self.0 {
            0 | 1 | 2 => 1,
            3 => 2,
            4 => 4,
            _ => 8,
        }
    }

    /// The class whose assembled width is closest to (at or below) the
    /// given pixel width. Used when classifying files found on disk.
    pub fn from_width_px(width: u32) -> Self {
        let mut id = 0u8;
        while id < 6 && 512u32 << (id + 1) <= width {
            id += 1;
        }
        Self(id)
    }

    pub fn prev(&self) -> Option<Self> {
        if self.0 == 0 {
            None
        } else {
            Some(Self(self.0 - 1))
        }
    }
}

/// Longitudinal tile width in degrees for the band containing |lat|.
pub fn tile_width_deg(lat: f64) -> f64 {
    let a = lat.abs();
    if a >= 89.0 {
        12.0
    } else if a >= 86.0 {
        4.0
    } else if a >= 83.0 {
        2.0
    } else if a >= 76.0 {
        1.0
    } else if a >= 62.0 {
        0.5
    } else if a >= 22.0 {
        0.25
    } else {
        0.125
    }
}

/// Local earth radius at a latitude, from the WGS84 ellipsoid.
pub fn local_earth_radius_m(lat: f64) -> f64 {
    let phi = lat.to_radians();
    let (s, c) = (phi.sin(), phi.cos());
    let num = (WGS84_A_M * WGS84_A_M * c).powi(2) + (WGS84_B_M * WGS84_B_M * s).powi(2);
    let den = (WGS84_A_M * c).powi(2) + (WGS84_B_M * s).powi(2);
    (num / den).sqrt()
}

/// Great-circle distance in meters via the spherical law of cosines, on a
/// sphere of the local earth radius at the midpoint latitude.
pub fn surface_distance_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let p1 = lat1.to_radians();
    let p2 = lat2.to_radians();
    let dl = (lon2 - lon1).to_radians();
    let central = (p1.sin() * p2.sin() + p1.cos() * p2.cos() * dl.cos())
        .max(-1.0)
        .min(1.0)
        .acos();
    local_earth_radius_m((lat1 + lat2) / 2.0) * central
}

pub fn surface_distance_nm(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    surface_distance_m(lon1, lat1, lon2, lat2) / METERS_PER_NM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_widths() {
        assert_eq!(tile_width_deg(0.0), 0.125);
        assert_eq!(tile_width_deg(21.999), 0.125);
        assert_eq!(tile_width_deg(22.0), 0.25);
        assert_eq!(tile_width_deg(-47.25), 0.25);
        assert_eq!(tile_width_deg(62.0), 0.5);
        assert_eq!(tile_width_deg(76.5), 1.0);
        assert_eq!(tile_width_deg(83.0), 2.0);
        assert_eq!(tile_width_deg(86.0), 4.0);
        assert_eq!(tile_width_deg(89.9), 12.0);
    }

    #[test]
    fn test_size_id_tables() {
        let widths = [512, 1024, 2048, 4096, 8192, 16384, 32768];
        let cols = [1, 1, 1, 2, 4, 8, 8];
        for i in 0..7u8 {
            let sid = SizeId::new(i).unwrap();
            assert_eq!(sid.width_px(), widths[i as usize]);
            assert_eq!(sid.chunk_cols(), cols[i as usize]);
            assert_eq!(SizeId::from_width_px(widths[i as usize]), sid);
        }
        assert!(SizeId::new(7).is_err());
        assert_eq!(SizeId::from_width_px(3000), SizeId::new(2).unwrap());
    }

    #[test]
    fn test_surface_distance_one_degree_lat() {
        // One degree of latitude is close to 60 nm everywhere.
        let nm = surface_distance_nm(11.0, 47.0, 11.0, 48.0);
        assert!((nm - 60.0).abs() < 0.5, "got {}", nm);
    }

    #[test]
    fn test_surface_distance_zero() {
        assert!(surface_distance_m(11.25, 47.5, 11.25, 47.5) < 1e-6);
    }
}
