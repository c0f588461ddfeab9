//! Built-in recycling drop-off points (Yongsan-gu collection bins).

use serde::Serialize;

use crate::geo::{self, GeoPoint, WithDistance};

/// Zoom used by the drop-off map.
pub const DROPOFF_ZOOM: u8 = 15;

struct BuiltinSpot {
    lat: f64,
    lng: f64,
    address: &'static str,
}

const SPOT_NAME: &str = "재활용품 수거함";

const BUILTIN_SPOTS: &[BuiltinSpot] = &[
    BuiltinSpot { lat: 37.531405951, lng: 126.968820855, address: "서울특별시 용산구 한강대로39길 34-5" },
    BuiltinSpot { lat: 37.526158356, lng: 126.963991217, address: "서울특별시 용산구 한강대로15길 8-5" },
    BuiltinSpot { lat: 37.532477219, lng: 126.992280033, address: "서울특별시 용산구 녹사평대로26가길 13" },
    BuiltinSpot { lat: 37.546230421, lng: 126.968248405, address: "서울특별시 용산구 청파로57가길 20" },
    BuiltinSpot { lat: 37.543276420, lng: 126.967577129, address: "서울특별시 용산구 청파로43길 47-16" },
    BuiltinSpot { lat: 37.542685125, lng: 126.96436403, address: "서울특별시 용산구 백범로79길 91" },
    BuiltinSpot { lat: 37.553795554, lng: 126.977122664, address: "서울특별시 용산구 소월로2나길 15-7" },
    BuiltinSpot { lat: 37.54254174, lng: 126.963011087, address: "서울특별시 용산구 효창원로72길 23" },
    BuiltinSpot { lat: 37.534944062, lng: 126.990599864, address: "서울특별시 용산구 이태원로15길 18" },
];

/// A fixed collection point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropoffSpot {
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint for DropoffSpot {
    fn lat(&self) -> f64 {
        self.lat
    }
    fn lng(&self) -> f64 {
        self.lng
    }
}

/// The full built-in list.
pub fn builtin_dropoff_spots() -> Vec<DropoffSpot> {
    BUILTIN_SPOTS
        .iter()
        .map(|s| DropoffSpot {
            name: SPOT_NAME.to_string(),
            address: s.address.to_string(),
            lat: s.lat,
            lng: s.lng,
        })
        .collect()
}

/// Built-in spots nearest first from the user's position.
pub fn dropoff_spots_from(lat: f64, lng: f64) -> Vec<WithDistance<DropoffSpot>> {
    let spots = builtin_dropoff_spots();
    let mut rows = geo::annotate_distance(&spots, lat, lng);
    rows.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    rows
}
