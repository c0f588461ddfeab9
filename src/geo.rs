//! Great-circle geometry over WGS84 points.
//!
//! Haversine distance, radius search and distance annotation for any record
//! that exposes a latitude/longitude pair, plus the small polygon helpers the
//! district map needs (ring centroid, bounding box).

use serde::Serialize;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Anything with a position on the map.
pub trait GeoPoint {
    fn lat(&self) -> f64;
    fn lng(&self) -> f64;
}

/// A record paired with its distance (meters) from some query centre.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithDistance<T> {
    #[serde(flatten)]
    pub item: T,
    pub distance_m: f64,
}

/// Great-circle distance in meters between two points (haversine formula).
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Pair every row with its distance from the centre. The input is untouched.
pub fn annotate_distance<T>(rows: &[T], center_lat: f64, center_lng: f64) -> Vec<WithDistance<T>>
where
    T: GeoPoint + Clone,
{
    rows.iter()
        .map(|row| WithDistance {
            distance_m: haversine_distance(center_lat, center_lng, row.lat(), row.lng()),
            item: row.clone(),
        })
        .collect()
}

/// Rows within `radius_m` of the centre, nearest first.
///
/// Equal distances keep their original relative order (stable sort).
/// `limit` truncates after sorting; `None` keeps everything in range.
pub fn find_nearby<T>(
    rows: &[T],
    center_lat: f64,
    center_lng: f64,
    radius_m: f64,
    limit: Option<usize>,
) -> Vec<WithDistance<T>>
where
    T: GeoPoint + Clone,
{
    let mut hits: Vec<WithDistance<T>> = annotate_distance(rows, center_lat, center_lng)
        .into_iter()
        .filter(|r| r.distance_m <= radius_m)
        .collect();

    hits.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));

    if let Some(n) = limit {
        hits.truncate(n);
    }
    hits
}

// ─── Polygons ────────────────────────────────────────────────────

/// Arithmetic mean of a ring's vertices, as `(lat, lng)`.
///
/// Positions are GeoJSON order (`[lng, lat, ..]`). Returns `None` for an empty
/// ring or one containing a position with fewer than two ordinates.
pub fn ring_centroid(ring: &[Vec<f64>]) -> Option<(f64, f64)> {
    if ring.is_empty() {
        return None;
    }
    let mut sum_lng = 0.0;
    let mut sum_lat = 0.0;
    for pos in ring {
        if pos.len() < 2 {
            return None;
        }
        sum_lng += pos[0];
        sum_lat += pos[1];
    }
    let n = ring.len() as f64;
    Some((sum_lat / n, sum_lng / n))
}

/// Axis-aligned lat/lng bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Bounds of a set of `[lng, lat]` positions. `None` when there are none.
    pub fn from_positions<'a, I>(positions: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Vec<f64>>,
    {
        let mut bbox: Option<BoundingBox> = None;
        for pos in positions {
            if pos.len() < 2 {
                continue;
            }
            let (lng, lat) = (pos[0], pos[1]);
            bbox = Some(match bbox {
                None => BoundingBox { min_lat: lat, min_lng: lng, max_lat: lat, max_lng: lng },
                Some(b) => b.extend(lat, lng),
            });
        }
        bbox
    }

    pub fn extend(self, lat: f64, lng: f64) -> Self {
        Self {
            min_lat: self.min_lat.min(lat),
            min_lng: self.min_lng.min(lng),
            max_lat: self.max_lat.max(lat),
            max_lng: self.max_lng.max(lng),
        }
    }

    pub fn union(self, other: BoundingBox) -> Self {
        self.extend(other.min_lat, other.min_lng)
            .extend(other.max_lat, other.max_lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[derive(Debug, Clone, PartialEq)]
    struct Pin {
        name: &'static str,
        lat: f64,
        lng: f64,
    }

    impl GeoPoint for Pin {
        fn lat(&self) -> f64 {
            self.lat
        }
        fn lng(&self) -> f64 {
            self.lng
        }
    }

    fn pins() -> Vec<Pin> {
        vec![
            Pin { name: "a", lat: 37.50, lng: 127.00 },
            Pin { name: "b", lat: 37.501, lng: 127.00 },
            Pin { name: "c", lat: 37.60, lng: 127.10 },
        ]
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        assert_eq!(haversine_distance(37.5665, 126.978, 37.5665, 126.978), 0.0);
    }

    #[test]
    fn test_haversine_symmetric() {
        let pairs = [
            (37.50, 127.00, 37.60, 127.10),
            (-33.8688, 151.2093, 51.5074, -0.1278),
            (0.0, 179.9, 0.0, -179.9),
        ];
        for (a, b, c, d) in pairs {
            assert_abs_diff_eq!(haversine_distance(a, b, c, d), haversine_distance(c, d, a, b), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_haversine_known_distances() {
        // 0.001° of latitude is ~111 m
        assert_abs_diff_eq!(haversine_distance(37.50, 127.00, 37.501, 127.00), 111.19, epsilon = 0.5);
        assert_abs_diff_eq!(haversine_distance(37.50, 127.00, 37.60, 127.10), 14_197.0, epsilon = 50.0);
    }

    #[test]
    fn test_find_nearby_radius_200() {
        let hits = find_nearby(&pins(), 37.50, 127.00, 200.0, None);
        let names: Vec<_> = hits.iter().map(|h| h.item.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(hits[0].distance_m, 0.0);
        assert!((hits[1].distance_m - 111.0).abs() < 1.0);
    }

    #[test]
    fn test_find_nearby_sorted_and_within_radius() {
        let mut rows = pins();
        rows.reverse();
        let hits = find_nearby(&rows, 37.55, 127.05, 10_000.0, None);
        assert!(hits.iter().all(|h| h.distance_m <= 10_000.0));
        assert!(hits.windows(2).all(|w| w[0].distance_m <= w[1].distance_m));
    }

    #[test]
    fn test_find_nearby_limit() {
        let hits = find_nearby(&pins(), 37.50, 127.00, 50_000.0, Some(2));
        assert_eq!(hits.len(), 2);
        let all = find_nearby(&pins(), 37.50, 127.00, 50_000.0, None);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_find_nearby_ties_keep_input_order() {
        let rows = vec![
            Pin { name: "first", lat: 37.51, lng: 127.0 },
            Pin { name: "second", lat: 37.51, lng: 127.0 },
            Pin { name: "third", lat: 37.51, lng: 127.0 },
        ];
        let hits = find_nearby(&rows, 37.50, 127.00, 5_000.0, None);
        let names: Vec<_> = hits.iter().map(|h| h.item.name).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_annotate_distance_leaves_input_alone() {
        let rows = pins();
        let before = rows.clone();
        let annotated = annotate_distance(&rows, 37.50, 127.00);
        assert_eq!(rows, before);
        assert_eq!(annotated.len(), rows.len());
        for (orig, ann) in rows.iter().zip(&annotated) {
            assert_eq!(orig, &ann.item);
        }
    }

    #[test]
    fn test_ring_centroid() {
        let ring = vec![vec![0.0, 0.0], vec![2.0, 0.0], vec![2.0, 2.0], vec![0.0, 2.0]];
        assert_eq!(ring_centroid(&ring), Some((1.0, 1.0)));
        assert_eq!(ring_centroid(&[]), None);
        assert_eq!(ring_centroid(&[vec![1.0]]), None);
    }

    #[test]
    fn test_bounding_box() {
        let ring = vec![vec![126.9, 37.4], vec![127.1, 37.7], vec![127.0, 37.5]];
        let bbox = BoundingBox::from_positions(&ring).unwrap();
        assert_eq!(bbox.min_lng, 126.9);
        assert_eq!(bbox.max_lat, 37.7);
        assert_eq!(bbox.min_lat, 37.4);
        assert_eq!(bbox.max_lng, 127.1);

        let other = BoundingBox { min_lat: 37.0, min_lng: 127.0, max_lat: 37.2, max_lng: 127.5 };
        let merged = bbox.union(other);
        assert_eq!(merged.min_lat, 37.0);
        assert_eq!(merged.max_lng, 127.5);
    }
}
