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

//! Map server profiles. Each provider is a small declarative record with a
//! URL template; rendering a request is pure string substitution so new
//! providers need a config entry, not code.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// One configured imagery provider.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MapServer {
    pub id: u32,
    pub name: String,
    pub url_base: String,
    pub url_template: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl MapServer {
    /// Substitute the bbox and pixel-size placeholders and glue the result
    /// onto the base URL. Coordinates use fixed six decimal places; pixel
    /// sizes are plain integers.
    pub fn render(
        &self,
        lon_ll: f64,
        lat_ll: f64,
        lon_ur: f64,
        lat_ur: f64,
        width_px: u32,
        height_px: u32,
    ) -> String {
        let query = self
            .url_template
            .replace("{latLL}", &format!("{:.6}", lat_ll))
            .replace("{lonLL}", &format!("{:.6}", lon_ll))
            .replace("{latUR}", &format!("{:.6}", lat_ur))
            .replace("{lonUR}", &format!("{:.6}", lon_ur))
            .replace("{szWidth}", &width_px.to_string())
            .replace("{szHight}", &height_px.to_string());
        format!("{}{}", self.url_base, query)
    }
}

/// Load the provider list from a JSON file and pick one by id.
pub fn load_servers(path: &Path) -> Result<Vec<MapServer>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading map server list {}", path.display()))?;
    let servers: Vec<MapServer> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    ensure!(!servers.is_empty(), "map server list {} is empty", path.display());
    Ok(servers)
}

pub fn select_server(servers: &[MapServer], id: u32) -> Result<MapServer> {
    servers
        .iter()
        .find(|s| s.id == id)
        .cloned()
        .with_context(|| format!("no map server with id {}", id))
}

/// The built-in default profile used when no list file is present.
pub fn default_server() -> MapServer {
    MapServer {
        id: 1,
        name: "arcgis-world-imagery".to_owned(),
        url_base: "https://services.arcgisonline.com".to_owned(),
        url_template: "/arcgis/rest/services/World_Imagery/MapServer/export?bbox={lonLL},{latLL},{lonUR},{latUR}&bboxSR=4326&size={szWidth},{szHight}&imageSR=4326&format=png24&f=image".to_owned(),
        proxy: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_all_placeholders() {
        let server = MapServer {
            id: 7,
            name: "test".to_owned(),
            url_base: "http://maps.example".to_owned(),
            url_template: "/get?b={lonLL},{latLL},{lonUR},{latUR}&s={szWidth}x{szHight}"
                .to_owned(),
            proxy: None,
        };
        let url = server.render(11.25, 47.25, 11.5, 47.375, 2048, 1024);
        assert_eq!(
            url,
            "http://maps.example/get?b=11.250000,47.250000,11.500000,47.375000&s=2048x1024"
        );
        assert!(!url.contains('{'));
    }

    #[test]
    fn test_negative_coordinates_keep_six_decimals() {
        let server = default_server();
        let url = server.render(-122.5, -37.875, -122.25, -37.75, 512, 512);
        assert!(url.contains("-122.500000,-37.875000,-122.250000,-37.750000"));
    }

    #[test]
    fn test_select_by_id() {
        let servers = vec![default_server()];
        assert!(select_server(&servers, 1).is_ok());
        assert!(select_server(&servers, 9).is_err());
    }
}
