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

//! Tile enumeration for one acquisition area: sweep the grid rows over
//! the bounding box, keep what falls inside the radius, pick a resolution
//! class per tile, and order the result nearest-first.

use crate::config::EngineConfig;
use std::collections::HashSet;
use tile_grid::{
    adaptive_size_id, ellipse_metric_nm, surface_distance_nm, tile_width_deg, SizeId,
    TileMetadata, LAT_STEP_DEG,
};

/// One acquisition request: a center, a radius, and optionally the
/// aircraft state that biases ordering and resolution.
#[derive(Copy, Clone, Debug)]
pub struct AreaRequest {
    pub lat: f64,
    pub lon: f64,
    pub radius_nm: f64,
    /// Present in direction-aware mode.
    pub heading_deg: Option<f64>,
    pub alt_ft: f64,
}

#[derive(Clone, Debug)]
pub struct Candidate {
    pub meta: TileMetadata,
    pub metric_nm: f64,
    pub radial_nm: f64,
}

/// Enumerate, filter, classify and order the tiles of an area. Tiles the
/// cache already satisfies are dropped here, before any job exists.
pub fn enumerate_area(
    req: &AreaRequest,
    cfg: &EngineConfig,
    is_satisfied: impl Fn(u32, SizeId) -> bool,
) -> Vec<Candidate> {
    let base = SizeId::clamped(cfg.size as i32);
    let sdwn = SizeId::clamped(cfg.sdwn as i32);

    // The inclusion test is always the circle; direction-aware mode only
    // widens the swept box so the stretched ordering metric has tiles to
    // rank ahead.
    let offset_nm = if req.heading_deg.is_some() {
        req.radius_nm / 2.0
    } else {
        0.0
    };
    let reach_deg_lat = (req.radius_nm + offset_nm) / 60.0;
    let cos_lat = req.lat.to_radians().cos().max(0.05);
    let reach_deg_lon = (req.radius_nm + offset_nm) / 60.0 / cos_lat;

    let lat_lo = ((req.lat - reach_deg_lat) / LAT_STEP_DEG).floor() * LAT_STEP_DEG;
    let lat_hi = req.lat + reach_deg_lat;

    let mut out = Vec::new();
    let mut seen_ids = HashSet::new();

    // The tile under the center is always wanted, however small the
    // radius; tile centers can all be farther away than the radius.
    if let Ok(meta) = TileMetadata::discover(req.lon, req.lat, base) {
        seen_ids.insert(meta.id);
        if !is_satisfied(meta.id.raw(), base) {
            out.push(Candidate {
                meta,
                metric_nm: 0.0,
                radial_nm: 0.0,
            });
        }
    }

    let mut row_lat = lat_lo;
    while row_lat <= lat_hi {
        let row_center = row_lat + LAT_STEP_DEG / 2.0;
        if row_center < -90.0 || row_center > 90.0 {
            row_lat += LAT_STEP_DEG;
            continue;
        }
        let width = tile_width_deg(row_center);
        let lon_lo = ((req.lon - reach_deg_lon) / width).floor() * width;
        let lon_hi = req.lon + reach_deg_lon;
        let mut col_lon = lon_lo;
        while col_lon <= lon_hi {
            let col_center = col_lon + width / 2.0;
            if col_center < -180.0 || col_center > 180.0 {
                col_lon += width;
                continue;
            }
            let radial_nm =
                surface_distance_nm(req.lon, req.lat, col_center, row_center);
            if radial_nm <= req.radius_nm {
                let metric_nm = match req.heading_deg {
                    Some(heading) => {
                        ellipse_metric_nm(req.lon, req.lat, heading, col_center, row_center)
                    }
                    None => radial_nm,
                };
                let size_id = adaptive_size_id(base, req.alt_ft, metric_nm, req.radius_nm, sdwn);
                if let Ok(meta) = TileMetadata::discover(col_center, row_center, size_id) {
                    if seen_ids.insert(meta.id) && !is_satisfied(meta.id.raw(), size_id) {
                        out.push(Candidate {
                            meta,
                            metric_nm,
                            radial_nm,
                        });
                    }
                }
            }
            col_lon += width;
        }
        row_lat += LAT_STEP_DEG;
    }

    out.sort_by(|a, b| {
        (a.metric_nm, a.radial_nm, a.meta.id.raw())
            .partial_cmp(&(b.metric_nm, b.radial_nm, b.meta.id.raw()))
            .expect("distances are finite")
    });
    out
}

/// The coarse class used for the pre-coverage phase of a tile list.
pub fn precover_level(candidates: &[Candidate], precover_gap: u8) -> SizeId {
    let min_required = candidates
        .iter()
        .map(|c| c.meta.size_id.raw())
        .min()
        .unwrap_or(0);
    SizeId::clamped((min_required as i32 - precover_gap as i32).max(0).min(2))
}
