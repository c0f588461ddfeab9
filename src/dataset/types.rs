//! Core types for the bin dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::geo::GeoPoint;

/// Sentinel meaning "no region filter".
pub const ALL_REGIONS: &str = "전체";

/// Default map view: Seoul City Hall.
pub const DEFAULT_CENTER: (f64, f64) = (37.5665, 126.9780);
pub const DEFAULT_ZOOM: u8 = 12;

/// The districts the bin dataset is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "마포구")]
    Mapo,
    #[serde(rename = "구로구")]
    Guro,
    #[serde(rename = "노원구")]
    Nowon,
    #[serde(rename = "서초구")]
    Seocho,
    #[serde(rename = "성북구")]
    Seongbuk,
    #[serde(rename = "중랑구")]
    Jungnang,
}

impl Region {
    pub const ALL: [Region; 6] = [
        Region::Mapo,
        Region::Guro,
        Region::Nowon,
        Region::Seocho,
        Region::Seongbuk,
        Region::Jungnang,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Mapo => "마포구",
            Self::Guro => "구로구",
            Self::Nowon => "노원구",
            Self::Seocho => "서초구",
            Self::Seongbuk => "성북구",
            Self::Jungnang => "중랑구",
        }
    }

    /// Exact district name lookup (surrounding whitespace ignored).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|r| r.name() == name)
    }

    /// Map centre used when the region is picked in the filter.
    pub fn center(self) -> (f64, f64) {
        match self {
            Self::Mapo => (37.5663, 126.9019),
            Self::Guro => (37.4954, 126.8874),
            Self::Nowon => (37.6542, 127.0568),
            Self::Seocho => (37.4837, 127.0324),
            Self::Seongbuk => (37.5894, 127.0167),
            Self::Jungnang => (37.6063, 127.0925),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse a region filter value. `None`, blank, "전체" and "all" mean no filter.
pub fn parse_region_filter(value: Option<&str>) -> Result<Option<Region>, String> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v == ALL_REGIONS || v.eq_ignore_ascii_case("all") => Ok(None),
        Some(v) => Region::from_name(v)
            .map(Some)
            .ok_or_else(|| format!("Unknown region '{}'", v)),
    }
}

/// One public waste bin, normalised from the district CSVs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteBin {
    /// `"{region}-{row_index}"`, unique across the merged dataset.
    pub id: String,
    pub region: Region,
    pub name: Option<String>,
    pub road_address: Option<String>,
    pub jibun_address: Option<String>,
    pub detail: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

impl WasteBin {
    /// Road address when present, otherwise the lot address.
    pub fn address(&self) -> Option<&str> {
        non_blank(self.road_address.as_deref()).or(non_blank(self.jibun_address.as_deref()))
    }

    /// "region · type · detail", with a generic type label when none is recorded.
    pub fn detail_line(&self) -> String {
        let kind = non_blank(self.kind.as_deref()).unwrap_or("일반 휴지통");
        let mut line = format!("{} · {}", self.region, kind);
        if let Some(detail) = non_blank(self.detail.as_deref()) {
            line.push_str(" · ");
            line.push_str(detail);
        }
        line
    }
}

impl GeoPoint for WasteBin {
    fn lat(&self) -> f64 {
        self.lat
    }
    fn lng(&self) -> f64 {
        self.lng
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Canonical fields a source CSV is mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Region,
    Name,
    RoadAddress,
    JibunAddress,
    Lat,
    Lng,
    Detail,
    Kind,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Region => "region",
            Self::Name => "name",
            Self::RoadAddress => "road_address",
            Self::JibunAddress => "jibun_address",
            Self::Lat => "lat",
            Self::Lng => "lng",
            Self::Detail => "detail",
            Self::Kind => "type",
        };
        f.write_str(s)
    }
}

/// Dataset loading errors. All are fatal to the load and surfaced as-is.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("No CSV files found in {}", .0.display())]
    NoDataFound(PathBuf),

    #[error("{file}: no column found for required field '{field}'")]
    MissingColumn { file: String, field: String },

    #[error("{file}: neither UTF-8 nor CP949 text")]
    Encoding { file: String },

    #[error("I/O error on {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {file}: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },

    #[error("GeoJSON error in {file}: {message}")]
    GeoJson { file: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin() -> WasteBin {
        WasteBin {
            id: "마포구-0".into(),
            region: Region::Mapo,
            name: Some("망원역 1번출구".into()),
            road_address: Some("  ".into()),
            jibun_address: Some("망원동 123".into()),
            detail: None,
            kind: None,
            lat: 37.556,
            lng: 126.910,
        }
    }

    #[test]
    fn test_region_roundtrip_names() {
        for r in Region::ALL {
            assert_eq!(Region::from_name(r.name()), Some(r));
        }
        assert_eq!(Region::from_name(" 구로구 "), Some(Region::Guro));
        assert_eq!(Region::from_name("강남구"), None);
    }

    #[test]
    fn test_region_filter_sentinels() {
        assert_eq!(parse_region_filter(None), Ok(None));
        assert_eq!(parse_region_filter(Some("전체")), Ok(None));
        assert_eq!(parse_region_filter(Some("ALL")), Ok(None));
        assert_eq!(parse_region_filter(Some("노원구")), Ok(Some(Region::Nowon)));
        assert!(parse_region_filter(Some("강남구")).is_err());
    }

    #[test]
    fn test_region_serializes_as_korean_name() {
        assert_eq!(serde_json::to_string(&Region::Seocho).unwrap(), "\"서초구\"");
    }

    #[test]
    fn test_address_falls_back_to_jibun() {
        assert_eq!(bin().address(), Some("망원동 123"));
    }

    #[test]
    fn test_detail_line() {
        let mut b = bin();
        assert_eq!(b.detail_line(), "마포구 · 일반 휴지통");
        b.kind = Some("재활용".into());
        b.detail = Some("버스정류장 옆".into());
        assert_eq!(b.detail_line(), "마포구 · 재활용 · 버스정류장 옆");
    }
}
