//! Waste-request district map: district boundaries plus each district's
//! online collection-request link.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use geojson::{Feature, GeoJson, Value};
use serde::Serialize;
use tracing::info;

use super::normalize::decode_text;
use super::types::DatasetError;
use crate::geo::{ring_centroid, BoundingBox};

/// Feature property holding the district name.
pub const DISTRICT_NAME_KEY: &str = "SIG_KOR_NM";

pub const LINK_DISTRICT_COLUMN: &str = "자치구";
pub const LINK_URL_COLUMN: &str = "신청링크";

/// Accepted boundary file names, first match wins.
pub const GEOJSON_FILES: &[&str] = &["seoul_districts.geojson", "서울_자치구_경계_2017.geojson"];
/// Accepted request-link file names, first match wins.
pub const LINKS_FILES: &[&str] = &["waste_request_links.csv", "폐기물_신청_링크.csv"];

/// One district as drawn on the request map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct District {
    pub name: String,
    /// Label position `(lat, lng)`; absent for geometries without a ring.
    pub centroid: Option<(f64, f64)>,
    pub link: Option<String>,
    pub popup: String,
}

/// The assembled request map.
#[derive(Debug, Clone, Serialize)]
pub struct DistrictMap {
    pub districts: Vec<District>,
    pub bounds: Option<BoundingBox>,
}

impl DistrictMap {
    pub fn get(&self, name: &str) -> Option<&District> {
        self.districts.iter().find(|d| d.name == name.trim())
    }
}

/// Read district → link pairs from CSV text. Keys and values are trimmed.
pub fn parse_links(text: &str, file: &str) -> Result<HashMap<String, String>, DatasetError> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());
    let headers = rdr
        .headers()
        .map_err(|source| DatasetError::Csv { file: file.to_string(), source })?
        .clone();

    let position = |column: &str| {
        headers.iter().position(|h| h.trim() == column).ok_or_else(|| DatasetError::MissingColumn {
            file: file.to_string(),
            field: column.to_string(),
        })
    };
    let district_idx = position(LINK_DISTRICT_COLUMN)?;
    let url_idx = position(LINK_URL_COLUMN)?;

    let mut links = HashMap::new();
    for record in rdr.records() {
        let record = record.map_err(|source| DatasetError::Csv { file: file.to_string(), source })?;
        let district = record.get(district_idx).unwrap_or("").trim();
        let url = record.get(url_idx).unwrap_or("").trim();
        if !district.is_empty() {
            links.insert(district.to_string(), url.to_string());
        }
    }
    Ok(links)
}

/// Outer ring used for a feature's label: Polygon ring 0, MultiPolygon polygon 0 ring 0.
fn label_ring(value: &Value) -> Option<&Vec<Vec<f64>>> {
    match value {
        Value::Polygon(rings) => rings.first(),
        Value::MultiPolygon(polys) => polys.first()?.first(),
        _ => None,
    }
}

/// Every vertex of a polygonal geometry.
fn all_positions(value: &Value) -> Vec<&Vec<f64>> {
    match value {
        Value::Polygon(rings) => rings.iter().flatten().collect(),
        Value::MultiPolygon(polys) => polys.iter().flatten().flatten().collect(),
        _ => Vec::new(),
    }
}

pub fn feature_centroid(feature: &Feature) -> Option<(f64, f64)> {
    let geometry = feature.geometry.as_ref()?;
    ring_centroid(label_ring(&geometry.value)?)
}

fn feature_name(feature: &Feature) -> String {
    feature
        .property(DISTRICT_NAME_KEY)
        .map(|v| match v.as_str() {
            Some(s) => s.trim().to_string(),
            None => v.to_string(),
        })
        .unwrap_or_default()
}

fn popup_text(name: &str, link: Option<&str>) -> String {
    match link {
        Some(url) => format!("{}: 폐기물 신청 페이지 열기 ({})", name, url),
        None => format!("{}: 등록된 신청 링크가 없습니다.", name),
    }
}

/// Join boundaries with request links.
pub fn build_district_map(geojson: &GeoJson, links: &HashMap<String, String>) -> DistrictMap {
    let features: Vec<&Feature> = match geojson {
        GeoJson::FeatureCollection(fc) => fc.features.iter().collect(),
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(_) => Vec::new(),
    };

    let mut bounds: Option<BoundingBox> = None;
    let mut districts = Vec::with_capacity(features.len());

    for feature in features {
        let name = feature_name(feature);
        let link = links.get(&name).filter(|u| !u.is_empty()).cloned();

        if let Some(geometry) = feature.geometry.as_ref() {
            if let Some(b) = BoundingBox::from_positions(all_positions(&geometry.value)) {
                bounds = Some(match bounds {
                    Some(acc) => acc.union(b),
                    None => b,
                });
            }
        }

        districts.push(District {
            popup: popup_text(&name, link.as_deref()),
            centroid: feature_centroid(feature),
            link,
            name,
        });
    }

    DistrictMap { districts, bounds }
}

/// First of `names` present in `dir`; the first name when none is.
fn pick_file(dir: &Path, names: &[&str]) -> PathBuf {
    names
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| dir.join(names.first().copied().unwrap_or_default()))
}

/// Load the boundary GeoJSON and the request-link CSV from `dir`.
pub fn load_district_map(dir: &Path) -> Result<DistrictMap, DatasetError> {
    let geo_path = pick_file(dir, GEOJSON_FILES);
    let links_path = pick_file(dir, LINKS_FILES);

    let links_file = links_path.display().to_string();
    let links_bytes = fs::read(&links_path)
        .map_err(|source| DatasetError::Io { file: links_file.clone(), source })?;
    let links = parse_links(&decode_text(&links_bytes, &links_file)?, &links_file)?;

    let geo_file = geo_path.display().to_string();
    let geo_text = fs::read_to_string(&geo_path)
        .map_err(|source| DatasetError::Io { file: geo_file.clone(), source })?;
    let geojson: GeoJson = geo_text
        .parse()
        .map_err(|e: geojson::Error| DatasetError::GeoJson { file: geo_file, message: e.to_string() })?;

    let map = build_district_map(&geojson, &links);
    info!(districts = map.districts.len(), links = links.len(), "district map loaded");
    Ok(map)
}
