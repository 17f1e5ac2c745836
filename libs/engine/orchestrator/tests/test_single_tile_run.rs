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

//! End-to-end: one tile through download, assembly and placement against
//! a local stub map server.

use map_profile::MapServer;
use orchestrator::{AreaRequest, Engine, EngineConfig};
use std::{
    io::{Cursor, Read, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::Duration,
};

/// Serve a valid 512x512 PNG for every request.
fn start_stub() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let mut body = Vec::new();
        let img = image::RgbaImage::from_fn(512, 512, |x, y| {
            image::Rgba([(x / 2) as u8, (y / 2) as u8, 64, 255])
        });
        img.write_to(&mut Cursor::new(&mut body), image::ImageOutputFormat::Png)
            .unwrap();
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(s) => s,
                Err(_) => break,
            };
            let body = body.clone();
            thread::spawn(move || serve_png(&mut stream, &body));
        }
    });
    port
}

fn serve_png(stream: &mut TcpStream, body: &[u8]) {
    let mut buf = [0u8; 2048];
    let mut seen = Vec::new();
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => seen.extend_from_slice(&buf[..n]),
        }
        if seen.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

#[test]
fn test_minimal_single_tile_session() {
    let port = start_stub();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Orthophotos");

    let cfg = EngineConfig::from_json(&format!(
        r#"{{
            "radius": 0.1,
            "size": 0,
            "over": 0,
            "path": "{}",
            "workers": 2,
            "monitor_interval": 1,
            "timeout": 5.0
        }}"#,
        root.display()
    ))
    .unwrap();

    let server = MapServer {
        id: 1,
        name: "stub".to_owned(),
        url_base: format!("http://127.0.0.1:{}", port),
        url_template: "/export?bbox={lonLL},{latLL},{lonUR},{latUR}&size={szWidth},{szHight}"
            .to_owned(),
        proxy: None,
    };

    let engine = Engine::start(cfg, server).unwrap();
    let report = engine
        .run_area_with_timeout(
            AreaRequest {
                lat: 47.25,
                lon: 11.31,
                radius_nm: 0.1,
                heading_deg: None,
                alt_ft: 0.0,
            },
            Duration::from_secs(60),
        )
        .unwrap();
    engine.shutdown();

    assert_eq!(report.tiles_planned, 1);
    assert_eq!(report.chunks_queued, 1);
    assert!(report.drained);

    // The tile id from the reference bit pattern, placed under the
    // expected directory pair, encoded as a 131200 byte DXT1 surface.
    let expected_id = ((11u32 + 180) << 14) | ((47u32 + 90) << 6) | (2 << 3) | 1;
    let placed = root
        .join("e010n40")
        .join("e011n47")
        .join(format!("{:07}.dds", expected_id));
    assert!(placed.exists(), "missing {}", placed.display());
    let len = std::fs::metadata(&placed).unwrap().len();
    assert_eq!(len, 128 + (512 / 4) * (512 / 4) * 8);

    let img = dxt1::decode_file(&placed).unwrap();
    assert_eq!(img.dimensions(), (512, 512));

    // The staging chunk was consumed by assembly.
    let staging = dir.path().join("Orthophotos-saved").join("tmp");
    let leftovers: Vec<_> = std::fs::read_dir(&staging)
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert!(leftovers.is_empty(), "staging not drained: {:?}", leftovers);
}
