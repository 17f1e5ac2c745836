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

//! The coverage snapshot: one entry per known tile id, carrying the record
//! a consumer should prefer. Final-tree copies outrank backups; within a
//! tree the highest resolution class wins.

use crate::CacheIndex;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use tile_grid::TileId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoverageBBox {
    #[serde(rename = "latLL")]
    pub lat_ll: f64,
    #[serde(rename = "lonLL")]
    pub lon_ll: f64,
    #[serde(rename = "latUR")]
    pub lat_ur: f64,
    #[serde(rename = "lonUR")]
    pub lon_ur: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoverageEntry {
    pub id: u32,
    pub bbox: CoverageBBox,
    #[serde(rename = "sizeId")]
    pub size_id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

pub(crate) fn build_snapshot(index: &CacheIndex) -> Vec<CoverageEntry> {
    // (in_final, size_id) ranks candidates; BTreeMap keeps the output
    // ordered by tile id between runs.
    let mut best: BTreeMap<u32, (bool, u8, String)> = BTreeMap::new();
    for (path, record) in index.snapshot_files() {
        let in_final = Path::new(&path).starts_with(index.final_root());
        let candidate = (in_final, record.size_id, record.last_modified.clone());
        match best.get(&record.id) {
            Some((have_final, have_size, _))
                if (*have_final, *have_size) >= (in_final, record.size_id) => {}
            _ => {
                best.insert(record.id, candidate);
            }
        }
    }

    best.into_iter()
        .map(|(id, (_, size_id, last_modified))| {
            let c = TileId::from_raw(id).unpack();
            CoverageEntry {
                id,
                bbox: CoverageBBox {
                    lat_ll: c.lat_base,
                    lon_ll: c.lon_base,
                    lat_ur: c.lat_base + tile_grid::LAT_STEP_DEG,
                    lon_ur: c.lon_base + c.lon_step,
                },
                size_id,
                last_modified: Some(last_modified),
            }
        })
        .collect()
}

pub(crate) fn write_snapshot(index: &CacheIndex, path: &Path) -> Result<()> {
    let entries = build_snapshot(index);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string(&entries)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
