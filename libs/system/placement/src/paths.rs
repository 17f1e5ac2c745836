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
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tile_grid::TileMetadata;

/// The on-disk layout of a scenery installation:
///
/// ```text
/// <root>/<dir10>/<dir1>/<tile_id>.dds
/// <root>-saved/<width>/<dir10>/<dir1>/<tile_id>.dds
/// <root>-saved/tmp/<tile_id>_<size>_<total>_<y>_<x>.png
/// ```
#[derive(Clone, Debug)]
pub struct SceneryPaths {
    root: PathBuf,
    backup_root: PathBuf,
    staging: PathBuf,
    keep_backups: bool,
}

impl SceneryPaths {
    pub fn new(root: &Path) -> Self {
        Self::with_options(root, None, true)
    }

    /// Layout with an explicit backup location and/or backups disabled.
    /// The staging directory always lives under the backup root, even
    /// when displaced tiles are discarded rather than kept.
    pub fn with_options(root: &Path, save_root: Option<&Path>, keep_backups: bool) -> Self {
        let backup_root = match save_root {
            Some(p) => p.to_owned(),
            None => {
                let mut saved = root.as_os_str().to_owned();
                saved.push("-saved");
                PathBuf::from(saved)
            }
        };
        let staging = backup_root.join("tmp");
        Self {
            root: root.to_owned(),
            backup_root,
            staging,
            keep_backups,
        }
    }

    pub fn keep_backups(&self) -> bool {
        self.keep_backups
    }

    /// Create the root, backup and staging directories. Failure here is
    /// fatal to the session.
    pub fn ensure_trees(&self) -> Result<()> {
        for dir in [&self.root, &self.backup_root, &self.staging] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating scenery directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Final resting place of a tile.
    pub fn tile_path(&self, meta: &TileMetadata, ext: &str) -> PathBuf {
        self.root
            .join(&meta.dir10)
            .join(&meta.dir1)
            .join(format!("{}.{}", meta.id, ext))
    }

    /// Backup location for a displaced tile of the given pixel width.
    pub fn backup_path(&self, meta: &TileMetadata, width: u32, ext: &str) -> PathBuf {
        self.backup_root
            .join(width.to_string())
            .join(&meta.dir10)
            .join(&meta.dir1)
            .join(format!("{}.{}", meta.id, ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_grid::SizeId;

    #[test]
    fn test_layout() {
        let paths = SceneryPaths::new(Path::new("/scenery/Orthophotos"));
        assert_eq!(
            paths.backup_root(),
            Path::new("/scenery/Orthophotos-saved")
        );
        assert_eq!(
            paths.staging(),
            Path::new("/scenery/Orthophotos-saved/tmp")
        );

        let meta = TileMetadata::discover(11.31, 47.25, SizeId::new(0).unwrap()).unwrap();
        let dest = paths.tile_path(&meta, "dds");
        assert_eq!(
            dest,
            Path::new("/scenery/Orthophotos/e010n40/e011n47")
                .join(format!("{}.dds", meta.id))
        );
        let backup = paths.backup_path(&meta, 8192, "dds");
        assert!(backup
            .display()
            .to_string()
            .contains("Orthophotos-saved/8192/e010n40/e011n47"));
    }
}
