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
use cache_index::CacheIndex;
use image::RgbaImage;
use placement::{place, OverwriteMode, PlacementOutcome, SceneryPaths};
use std::{fs, path::PathBuf, sync::Arc};
use tempfile::TempDir;
use tile_grid::{SizeId, TileMetadata};

struct Fixture {
    _dir: TempDir,
    paths: SceneryPaths,
    index: Arc<CacheIndex>,
    meta: TileMetadata,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = SceneryPaths::new(&dir.path().join("Orthophotos"));
        paths.ensure_trees().unwrap();
        let index = CacheIndex::open(
            paths.root(),
            paths.backup_root(),
            &dir.path().join("index.json"),
            "test",
        )
        .unwrap();
        let meta = TileMetadata::discover(11.31, 47.25, SizeId::new(1).unwrap()).unwrap();
        Self {
            _dir: dir,
            paths,
            index,
            meta,
        }
    }

    /// A finished tile waiting in staging, of the given pixel width.
    fn staged(&self, width: u32) -> PathBuf {
        let path = self.paths.staging().join(format!("{}.dds", self.meta.id));
        let img = RgbaImage::from_pixel(width, width, image::Rgba([width as u8, 0, 0, 255]));
        dxt1::convert_image(&img, &path).unwrap();
        path
    }

    fn dest(&self) -> PathBuf {
        self.paths.tile_path(&self.meta, "dds")
    }

    fn dest_width(&self) -> u32 {
        dxt1::read_header(&self.dest()).unwrap().width
    }
}

#[test]
fn test_place_into_empty_tree() {
    let fx = Fixture::new();
    let src = fx.staged(512);
    let outcome = place(&src, &fx.meta, &fx.paths, OverwriteMode::Keep, &fx.index).unwrap();
    assert_eq!(outcome, PlacementOutcome::Placed);
    assert!(fx.dest().exists());
    assert!(!src.exists());
    assert!(fx.index.lookup(&fx.dest()).is_some());
}

#[test]
fn test_keep_mode_never_replaces() {
    let fx = Fixture::new();
    place(&fx.staged(512), &fx.meta, &fx.paths, OverwriteMode::Keep, &fx.index).unwrap();
    let src = fx.staged(1024);
    let outcome = place(&src, &fx.meta, &fx.paths, OverwriteMode::Keep, &fx.index).unwrap();
    assert_eq!(outcome, PlacementOutcome::SkippedExisting);
    assert_eq!(fx.dest_width(), 512);
    assert!(!src.exists());
}

#[test]
fn test_upgrade_mode_replaces_only_wider() {
    let fx = Fixture::new();
    place(&fx.staged(1024), &fx.meta, &fx.paths, OverwriteMode::Upgrade, &fx.index).unwrap();

    // Narrower incoming: dropped.
    let narrow = fx.staged(512);
    let outcome =
        place(&narrow, &fx.meta, &fx.paths, OverwriteMode::Upgrade, &fx.index).unwrap();
    assert_eq!(outcome, PlacementOutcome::SkippedExisting);
    assert_eq!(fx.dest_width(), 1024);
    assert!(!narrow.exists());

    // Equal width: also dropped.
    let equal = fx.staged(1024);
    let outcome =
        place(&equal, &fx.meta, &fx.paths, OverwriteMode::Upgrade, &fx.index).unwrap();
    assert_eq!(outcome, PlacementOutcome::SkippedExisting);

    // Wider incoming: replaced, old file preserved under its width.
    let wide = fx.staged(2048);
    let outcome =
        place(&wide, &fx.meta, &fx.paths, OverwriteMode::Upgrade, &fx.index).unwrap();
    assert_eq!(outcome, PlacementOutcome::ReplacedWithBackup);
    assert_eq!(fx.dest_width(), 2048);
    assert!(fx.paths.backup_path(&fx.meta, 1024, "dds").exists());
}

#[test]
fn test_always_mode_backs_up_unconditionally() {
    let fx = Fixture::new();
    place(&fx.staged(1024), &fx.meta, &fx.paths, OverwriteMode::Always, &fx.index).unwrap();
    let narrow = fx.staged(512);
    let outcome =
        place(&narrow, &fx.meta, &fx.paths, OverwriteMode::Always, &fx.index).unwrap();
    assert_eq!(outcome, PlacementOutcome::ReplacedWithBackup);
    assert_eq!(fx.dest_width(), 512);
    assert!(fx.paths.backup_path(&fx.meta, 1024, "dds").exists());
}

#[test]
fn test_corrupt_destination_is_replaced() {
    let fx = Fixture::new();
    let dest = fx.dest();
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    fs::write(&dest, b"garbage that is not a dds").unwrap();

    let src = fx.staged(512);
    let outcome =
        place(&src, &fx.meta, &fx.paths, OverwriteMode::Upgrade, &fx.index).unwrap();
    assert_eq!(outcome, PlacementOutcome::Placed);
    assert_eq!(fx.dest_width(), 512);
}

#[test]
fn test_placing_onto_itself_is_a_noop() {
    let fx = Fixture::new();
    place(&fx.staged(512), &fx.meta, &fx.paths, OverwriteMode::Keep, &fx.index).unwrap();
    let dest = fx.dest();
    let outcome = place(&dest, &fx.meta, &fx.paths, OverwriteMode::Always, &fx.index).unwrap();
    assert_eq!(outcome, PlacementOutcome::NoOp);
    assert!(dest.exists());
}
