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
use crate::{SizeId, TileId, LAT_STEP_DEG};
use anyhow::Result;

/// Geographic bounding box in degrees.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BBox {
    pub lon_ll: f64,
    pub lat_ll: f64,
    pub lon_ur: f64,
    pub lat_ur: f64,
}

impl BBox {
    pub fn width(&self) -> f64 {
        self.lon_ur - self.lon_ll
    }

    pub fn height(&self) -> f64 {
        self.lat_ur - self.lat_ll
    }
}

/// Immutable description of one scenery tile at a chosen resolution class.
/// Built once when a job is planned and carried unchanged through download,
/// assembly and placement.
#[derive(Clone, Debug, PartialEq)]
pub struct TileMetadata {
    pub id: TileId,
    pub size_id: SizeId,
    pub bbox: BBox,
    pub x: u32,
    pub y: u32,
    pub lon_c: f64,
    pub lat_c: f64,
    pub lon_step: f64,
    pub width_px: u32,
    pub cols: u32,
    pub dir10: String,
    pub dir1: String,
}

impl TileMetadata {
    /// Describe the tile containing the given position.
    pub fn discover(lon: f64, lat: f64, size_id: SizeId) -> Result<Self> {
        let id = TileId::from_lon_lat(lon, lat)?;
        Ok(Self::from_id(id, size_id))
    }

    /// Rebuild a full description from a packed id, e.g. when re-planning a
    /// tile at a different resolution after a failure.
    pub fn from_id(id: TileId, size_id: SizeId) -> Self {
        let c = id.unpack();
        Self {
            id,
            size_id,
            bbox: BBox {
                lon_ll: c.lon_base,
                lat_ll: c.lat_base,
                lon_ur: c.lon_base + c.lon_step,
                lat_ur: c.lat_base + LAT_STEP_DEG,
            },
            x: c.x,
            y: c.y,
            lon_c: c.lon_c,
            lat_c: c.lat_c,
            lon_step: c.lon_step,
            width_px: size_id.width_px(),
            cols: size_id.chunk_cols(),
            dir10: c.dir10,
            dir1: c.dir1,
        }
    }

    /// The same tile one resolution class down, if there is one.
    pub fn downgraded(&self) -> Option<Self> {
        self.size_id.prev().map(|sid| Self::from_id(self.id, sid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_innsbruck() {
        let meta = TileMetadata::discover(11.31, 47.25, SizeId::new(4).unwrap()).unwrap();
        assert_eq!(meta.bbox.lon_ll, 11.25);
        assert_eq!(meta.bbox.lat_ll, 47.25);
        assert_eq!(meta.bbox.lon_ur, 11.5);
        assert_eq!(meta.bbox.lat_ur, 47.375);
        assert_eq!(meta.width_px, 8192);
        assert_eq!(meta.cols, 4);
        assert_eq!(meta.dir1, "e011n47");
    }

    #[test]
    fn test_downgrade_chain_stops_at_zero() {
        let mut meta = TileMetadata::discover(11.31, 47.25, SizeId::new(2).unwrap()).unwrap();
        let id = meta.id;
        let mut steps = 0;
        while let Some(down) = meta.downgraded() {
            assert_eq!(down.id, id);
            assert_eq!(down.size_id.raw() + 1, meta.size_id.raw());
            meta = down;
            steps += 1;
        }
        assert_eq!(steps, 2);
        assert_eq!(meta.size_id, SizeId::MIN);
    }
}
