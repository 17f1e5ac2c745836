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

//! Fast tile previews: transcode a placed DDS (or PNG) into a small PNG
//! for the web map overlay.

use crate::ControlState;
use axum::{
    extract::{Extension, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use image::imageops::FilterType;
use serde::Deserialize;
use std::{io::Cursor, path::PathBuf, sync::Arc};
use tile_grid::{SizeId, TileId, TileMetadata};

const MAX_PREVIEW_WIDTH: u32 = 2048;

#[derive(Deserialize)]
pub(crate) struct PreviewQuery {
    id: u32,
    w: Option<u32>,
}

fn placed_tile_path(state: &ControlState, tile_id: u32) -> Option<(PathBuf, bool)> {
    let meta = TileMetadata::from_id(TileId::from_raw(tile_id), SizeId::MIN);
    let dds = state.engine.paths().tile_path(&meta, "dds");
    if dds.exists() {
        return Some((dds, true));
    }
    let png = state.engine.paths().tile_path(&meta, "png");
    if png.exists() {
        return Some((png, false));
    }
    None
}

pub(crate) async fn preview(
    Extension(state): Extension<Arc<ControlState>>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let (path, is_dds) = match placed_tile_path(&state, query.id) {
        Some(found) => found,
        None => return (StatusCode::NOT_FOUND, "tile not on disk".to_owned()).into_response(),
    };

    let decoded = if is_dds {
        dxt1::decode_file(&path)
    } else {
        image::open(&path).map(|i| i.to_rgba8()).map_err(|e| e.into())
    };
    let img = match decoded {
        Ok(img) => img,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("tile unreadable: {}", e),
            )
                .into_response()
        }
    };

    let width = query.w.unwrap_or(512).clamp(16, MAX_PREVIEW_WIDTH);
    let scale = width as f64 / img.width() as f64;
    let height = ((img.height() as f64 * scale).round() as u32).max(1);
    let small = image::imageops::resize(&img, width, height, FilterType::Triangle);

    let mut bytes = Cursor::new(Vec::new());
    if let Err(e) = small.write_to(&mut bytes, image::ImageOutputFormat::Png) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("png encode: {}", e),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/png")],
        bytes.into_inner(),
    )
        .into_response()
}
