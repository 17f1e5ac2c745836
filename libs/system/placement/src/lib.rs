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

//! Final placement of assembled tiles into the scenery tree. This is the
//! single point where the overwrite policy is applied and where existing
//! work is preserved into the backup tree, so every move routes through
//! here and updates the cache index.

mod paths;

pub use paths::SceneryPaths;

use anyhow::{bail, Context, Result};
use cache_index::CacheIndex;
use log::{debug, info, warn};
use std::{fs, path::Path};
use tile_grid::TileMetadata;

/// Overwrite policy for an occupied destination.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OverwriteMode {
    /// Never replace; the incoming file is discarded.
    Keep,
    /// Replace only when the incoming tile is wider; the old file moves to
    /// the backup tree.
    Upgrade,
    /// Always replace, always preserving the old file.
    Always,
}

impl OverwriteMode {
    pub fn from_flag(over: u8) -> Result<Self> {
        Ok(match over {
            0 => Self::Keep,
            1 => Self::Upgrade,
            2 => Self::Always,
            n => bail!("overwrite mode {} not in 0..=2", n),
        })
    }
}

/// What place() decided to do, mostly for logging and tests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlacementOutcome {
    Placed,
    SkippedExisting,
    ReplacedWithBackup,
    NoOp,
}

/// Pixel width of an existing tile file, used to rank it against an
/// incoming one. None means unreadable, which placement treats as corrupt.
fn measure_width(path: &Path) -> Option<u32> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("dds") => dxt1::read_header(path).ok().map(|h| h.width),
        Some("png") => dxt1::png::probe_file(path).ok().map(|(w, _)| w),
        _ => None,
    }
}

/// Rename with a copy fallback for cross-device moves. The copy lands in
/// a temp name next to the destination first so a crash never leaves a
/// half-written tile under its final name.
fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    let tmp = dest.with_extension("move.tmp");
    if let Err(e) = fs::copy(source, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| {
            format!("moving {} to {}", source.display(), dest.display())
        });
    }
    fs::rename(&tmp, dest)?;
    fs::remove_file(source)?;
    Ok(())
}

/// Place a finished tile file according to the overwrite policy.
pub fn place(
    source: &Path,
    meta: &TileMetadata,
    paths: &SceneryPaths,
    mode: OverwriteMode,
    index: &CacheIndex,
) -> Result<PlacementOutcome> {
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("dds")
        .to_owned();
    let dest = paths.tile_path(meta, &ext);

    if dest == source {
        return Ok(PlacementOutcome::NoOp);
    }

    if !dest.exists() {
        move_file(source, &dest)?;
        // The source may have been an indexed backup; its record moves.
        index.remove_path(source);
        index.record_file(&dest)?;
        debug!("placed {} as {}", meta.id, dest.display());
        return Ok(PlacementOutcome::Placed);
    }

    match mode {
        OverwriteMode::Keep => {
            fs::remove_file(source)?;
            index.remove_path(source);
            debug!("kept existing {}", dest.display());
            Ok(PlacementOutcome::SkippedExisting)
        }
        OverwriteMode::Upgrade => match measure_width(&dest) {
            None => {
                // Unreadable destination: treat as corrupt and replace.
                warn!("removing corrupt tile {}", dest.display());
                fs::remove_file(&dest)?;
                index.remove_path(&dest);
                move_file(source, &dest)?;
                index.record_file(&dest)?;
                Ok(PlacementOutcome::Placed)
            }
            Some(existing_width) => {
                let new_width = measure_width(source).unwrap_or(0);
                if new_width <= existing_width {
                    fs::remove_file(source)?;
                    debug!(
                        "kept {} ({}px >= {}px incoming)",
                        dest.display(),
                        existing_width,
                        new_width
                    );
                    Ok(PlacementOutcome::SkippedExisting)
                } else {
                    backup_then_place(source, &dest, existing_width, meta, paths, index)
                }
            }
        },
        OverwriteMode::Always => match measure_width(&dest) {
            Some(existing_width) => {
                backup_then_place(source, &dest, existing_width, meta, paths, index)
            }
            None => {
                warn!("removing corrupt tile {}", dest.display());
                fs::remove_file(&dest)?;
                index.remove_path(&dest);
                move_file(source, &dest)?;
                index.record_file(&dest)?;
                Ok(PlacementOutcome::Placed)
            }
        },
    }
}

fn backup_then_place(
    source: &Path,
    dest: &Path,
    existing_width: u32,
    meta: &TileMetadata,
    paths: &SceneryPaths,
    index: &CacheIndex,
) -> Result<PlacementOutcome> {
    if paths.keep_backups() {
        let ext = dest.extension().and_then(|e| e.to_str()).unwrap_or("dds");
        let backup = paths.backup_path(meta, existing_width, ext);
        move_file(dest, &backup)?;
        index.remove_path(dest);
        index.record_file(&backup)?;
        info!(
            "replaced {} ({}px moved to backup)",
            dest.display(),
            existing_width
        );
    } else {
        fs::remove_file(dest)?;
        index.remove_path(dest);
        info!("replaced {} ({}px discarded)", dest.display(), existing_width);
    }
    move_file(source, dest)?;
    index.record_file(dest)?;
    Ok(PlacementOutcome::ReplacedWithBackup)
}

/// Restore a cached backup copy into the final tree. Used by the fallback
/// path; never replaces an existing final file.
pub fn restore_from_backup(
    backup_file: &Path,
    meta: &TileMetadata,
    paths: &SceneryPaths,
    index: &CacheIndex,
) -> Result<PlacementOutcome> {
    place(backup_file, meta, paths, OverwriteMode::Keep, index)
}
