//! Source CSV → canonical `WasteBin` rows.
//!
//! Each district publishes its bin list with its own header spellings. Every
//! canonical field has a priority list of candidate headers; the first one
//! present wins. Latitude and longitude are required.

use std::collections::HashMap;
use std::io::Read;

use encoding_rs::EUC_KR;
use tracing::debug;

use super::types::{DatasetError, Field, Region, WasteBin};

/// Candidate header names per canonical field, highest priority first.
pub const COLUMN_CANDIDATES: &[(Field, &[&str])] = &[
    (Field::Region, &["시군구명", "자치구명", "구명"]),
    (Field::Name, &["설치장소명", "휴지통설치장소", "설치 장소명"]),
    (Field::RoadAddress, &["소재지도로명주소", "도로명주소"]),
    (Field::JibunAddress, &["소재지지번주소", "지번주소"]),
    (Field::Lat, &["위도", "Y좌표", "Y좌표(WGS84)"]),
    (Field::Lng, &["경도", "X좌표", "X좌표(WGS84)"]),
    (Field::Detail, &["상세위치", "세부위치", "비고"]),
    (Field::Kind, &["휴지통종류", "용도구분"]),
];

const REQUIRED: [Field; 2] = [Field::Lat, Field::Lng];

/// Resolved column index per canonical field.
#[derive(Debug, Default)]
pub struct ColumnMap {
    indices: HashMap<Field, usize>,
}

impl ColumnMap {
    /// Pick the first candidate header present for each field.
    pub fn resolve(headers: &csv::StringRecord, file: &str) -> Result<Self, DatasetError> {
        let names: Vec<&str> = headers.iter().map(|h| h.trim()).collect();
        let mut indices = HashMap::new();

        for (field, candidates) in COLUMN_CANDIDATES {
            let found = candidates
                .iter()
                .find_map(|cand| names.iter().position(|h| h == cand));
            if let Some(idx) = found {
                indices.insert(*field, idx);
            }
        }

        for field in REQUIRED {
            if !indices.contains_key(&field) {
                return Err(DatasetError::MissingColumn {
                    file: file.to_string(),
                    field: field.to_string(),
                });
            }
        }

        Ok(Self { indices })
    }

    pub fn index(&self, field: Field) -> Option<usize> {
        self.indices.get(&field).copied()
    }

    fn text(&self, record: &csv::StringRecord, field: Field) -> Option<String> {
        let value = record.get(self.index(field)?)?.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    fn number(&self, record: &csv::StringRecord, field: Field) -> Option<f64> {
        let value: f64 = record.get(self.index(field)?)?.trim().parse().ok()?;
        value.is_finite().then_some(value)
    }
}

/// Normalise one CSV source.
///
/// Rows with unparseable coordinates or a region outside the allow-list are
/// dropped. Ids are assigned from the row position after filtering.
pub fn normalize_csv<R: Read>(reader: R, file: &str) -> Result<Vec<WasteBin>, DatasetError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::None)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|source| DatasetError::Csv { file: file.to_string(), source })?
        .clone();
    let columns = ColumnMap::resolve(&headers, file)?;

    let mut bins = Vec::new();
    let mut dropped = 0usize;

    for record in rdr.records() {
        let record = record.map_err(|source| DatasetError::Csv { file: file.to_string(), source })?;

        let (Some(lat), Some(lng)) = (
            columns.number(&record, Field::Lat),
            columns.number(&record, Field::Lng),
        ) else {
            dropped += 1;
            continue;
        };

        let Some(region) = columns
            .text(&record, Field::Region)
            .and_then(|r| Region::from_name(&r))
        else {
            dropped += 1;
            continue;
        };

        let id = format!("{}-{}", region, bins.len());
        bins.push(WasteBin {
            id,
            region,
            name: columns.text(&record, Field::Name),
            road_address: columns.text(&record, Field::RoadAddress),
            jibun_address: columns.text(&record, Field::JibunAddress),
            detail: columns.text(&record, Field::Detail),
            kind: columns.text(&record, Field::Kind),
            lat,
            lng,
        });
    }

    debug!(file, kept = bins.len(), dropped, "normalized bin CSV");
    Ok(bins)
}

/// Decode raw file bytes: UTF-8 (BOM tolerated) first, then CP949/EUC-KR.
pub fn decode_text(bytes: &[u8], file: &str) -> Result<String, DatasetError> {
    let utf8 = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(utf8) {
        return Ok(text.to_string());
    }
    match EUC_KR.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => {
            debug!(file, "decoded as CP949");
            Ok(text.into_owned())
        }
        None => Err(DatasetError::Encoding { file: file.to_string() }),
    }
}
