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
use crate::SizeId;

/// Altitude above which one extra reduction step is applied; the ground
/// detail is invisible from up there anyway.
const HIGH_ALTITUDE_FT: f64 = 25_000.0;

/// Distance-adaptive resolution selection.
///
/// Full resolution is kept out to half the acquisition radius; beyond that
/// the class drops one step immediately and one more per started 10 nm,
/// with a further step at high altitude. The result is clamped into
/// [sdwn, base].
pub fn adaptive_size_id(
    base: SizeId,
    alt_ft: f64,
    dist_nm: f64,
    radius_nm: f64,
    sdwn: SizeId,
) -> SizeId {
    let floor = sdwn.min(base);
    let near = radius_nm / 2.0;
    if dist_nm <= near {
        return base;
    }
    let mut steps = ((dist_nm - near) / 10.0).floor() as i32 + 1;
    if alt_ft > HIGH_ALTITUDE_FT {
        steps += 1;
    }
    let reduced = SizeId::clamped(base.raw() as i32 - steps);
    reduced.max(floor).min(base)
}

/// Direction-aware metric: distance measured against an ellipse with the
/// major semi-axis (1.5x radius) pointing along the current heading. Used
/// for ordering and LOD selection only; area inclusion stays circular.
pub fn ellipse_metric_nm(
    center_lon: f64,
    center_lat: f64,
    heading_deg: f64,
    lon: f64,
    lat: f64,
) -> f64 {
    let east_nm = (lon - center_lon) * 60.0 * center_lat.to_radians().cos();
    let north_nm = (lat - center_lat) * 60.0;
    let h = heading_deg.to_radians();
    let along = east_nm * h.sin() + north_nm * h.cos();
    let cross = east_nm * h.cos() - north_nm * h.sin();
    ((along / 1.5).powi(2) + cross.powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(raw: u8) -> SizeId {
        SizeId::new(raw).unwrap()
    }

    #[test]
    fn test_full_resolution_inside_half_radius() {
        for d in [0.0, 5.0, 10.0] {
            assert_eq!(adaptive_size_id(sid(5), 3_000.0, d, 20.0, sid(0)), sid(5));
        }
    }

    #[test]
    fn test_monotone_and_one_step_per_ten_nm() {
        let mut last = 6;
        for d in 0..12 {
            let got = adaptive_size_id(sid(6), 3_000.0, d as f64 * 10.0, 20.0, sid(0));
            assert!(got.raw() <= last);
            last = got.raw();
        }
        // 10 nm past the near field must already have lost one step.
        let near = adaptive_size_id(sid(6), 3_000.0, 10.0, 20.0, sid(0));
        let far = adaptive_size_id(sid(6), 3_000.0, 20.0, 20.0, sid(0));
        assert!(far.raw() < near.raw());
    }

    #[test]
    fn test_clamped_by_sdwn() {
        assert_eq!(adaptive_size_id(sid(5), 3_000.0, 200.0, 20.0, sid(3)), sid(3));
        assert_eq!(adaptive_size_id(sid(5), 3_000.0, 200.0, 20.0, sid(0)), sid(0));
    }

    #[test]
    fn test_altitude_reduction() {
        let low = adaptive_size_id(sid(6), 3_000.0, 15.0, 20.0, sid(0));
        let high = adaptive_size_id(sid(6), 30_000.0, 15.0, 20.0, sid(0));
        assert_eq!(high.raw() + 1, low.raw());
    }

    #[test]
    fn test_ellipse_stretches_along_heading() {
        // Two points 12 nm out, one ahead (north) and one abeam (east).
        let ahead = ellipse_metric_nm(11.0, 47.0, 0.0, 11.0, 47.2);
        let abeam = ellipse_metric_nm(11.0, 47.0, 0.0, 11.0 + 0.2 / 47f64.to_radians().cos(), 47.0);
        assert!(ahead < abeam, "ahead {} abeam {}", ahead, abeam);
        assert!((ahead * 1.5 - abeam).abs() < 0.1);
    }
}
