#![allow(dead_code)]

use std::fs;
use std::path::Path;

use axum::Router;

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub const GURO_CSV: &str = "\u{feff}시군구명,설치장소명,소재지도로명주소,위도,경도,휴지통종류\n\
    구로구,신도림역 1번 출구,경인로 1,37.5000,127.0000,재활용\n\
    구로구,신도림역 2번 출구,경인로 2,37.5010,127.0000,\n\
    구로구,좌표 없음,경인로 3,,127.0\n";

pub const NOWON_CSV: &str = "자치구명,휴지통설치장소,도로명주소,Y좌표,X좌표\n\
    노원구,노원역,동일로 1,37.6000,127.1000\n\
    강남구,강남역,강남대로 1,37.4979,127.0276\n";

pub const DISTRICTS_GEOJSON: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {
            "type": "Feature",
            "properties": { "SIG_KOR_NM": "구로구" },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[126.85, 37.48], [126.90, 37.48], [126.90, 37.51], [126.85, 37.51]]]
            }
        },
        {
            "type": "Feature",
            "properties": { "SIG_KOR_NM": "노원구" },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[127.05, 37.63], [127.09, 37.63], [127.09, 37.68], [127.05, 37.68]]]
            }
        }
    ]
}"#;

pub const LINKS_CSV: &str = "자치구,신청링크\n구로구,https://guro.example/waste\n";

/// Lay out `trash/` and `recycle_link/` under `root`.
pub fn write_data_dir(root: &Path) {
    let trash = root.join("trash");
    fs::create_dir_all(&trash).unwrap();
    fs::write(trash.join("a_guro.csv"), GURO_CSV).unwrap();
    fs::write(trash.join("b_nowon.csv"), NOWON_CSV).unwrap();

    let links = root.join("recycle_link");
    fs::create_dir_all(&links).unwrap();
    fs::write(links.join("seoul_districts.geojson"), DISTRICTS_GEOJSON).unwrap();
    fs::write(links.join("waste_request_links.csv"), LINKS_CSV).unwrap();
}
