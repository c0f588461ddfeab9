//! Filtering, search, ordering and paging over the bin dataset.

use std::cmp::Ordering;

use serde::Serialize;

use super::types::{Region, WasteBin};
use crate::geo::{self, WithDistance};

/// Rows shown initially and added per "load more".
pub const PAGE_SIZE: usize = 20;

pub const DEFAULT_RADIUS_M: f64 = 300.0;
pub const MIN_RADIUS_M: f64 = 100.0;
pub const MAX_RADIUS_M: f64 = 1000.0;

/// Rows in the given region; `None` keeps everything.
pub fn filter_by_region(bins: &[WasteBin], region: Option<Region>) -> Vec<WasteBin> {
    match region {
        None => bins.to_vec(),
        Some(r) => bins.iter().filter(|b| b.region == r).cloned().collect(),
    }
}

/// Case-insensitive substring match on name + road address + lot address.
/// A blank query keeps everything.
pub fn search_by_keyword(bins: &[WasteBin], text: &str) -> Vec<WasteBin> {
    let kw = text.trim().to_lowercase();
    if kw.is_empty() {
        return bins.to_vec();
    }
    bins.iter()
        .filter(|b| search_target(b).contains(&kw))
        .cloned()
        .collect()
}

fn search_target(bin: &WasteBin) -> String {
    let parts = [&bin.name, &bin.road_address, &bin.jibun_address];
    parts
        .iter()
        .map(|p| p.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One list row: the bin plus its distance from the user when known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListedBin {
    #[serde(flatten)]
    pub bin: WasteBin,
    pub distance_m: Option<f64>,
}

impl ListedBin {
    /// "123 m", or "- m" without a distance.
    pub fn distance_text(&self) -> String {
        match self.distance_m {
            Some(d) => format!("{:.0} m", d),
            None => "- m".to_string(),
        }
    }
}

impl From<WithDistance<WasteBin>> for ListedBin {
    fn from(w: WithDistance<WasteBin>) -> Self {
        Self { bin: w.item, distance_m: Some(w.distance_m) }
    }
}

/// Everything the bin list page filters on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinQuery {
    pub region: Option<Region>,
    pub keyword: String,
    pub user_location: Option<(f64, f64)>,
    pub nearby: bool,
    pub radius_m: Option<f64>,
}

impl BinQuery {
    /// Radius clamped to the slider range, default when unset.
    pub fn radius(&self) -> f64 {
        self.radius_m
            .filter(|r| r.is_finite())
            .unwrap_or(DEFAULT_RADIUS_M)
            .clamp(MIN_RADIUS_M, MAX_RADIUS_M)
    }

    /// True when results are restricted to the user's surroundings.
    pub fn is_nearby(&self) -> bool {
        self.nearby && self.user_location.is_some()
    }

    /// Region filter → keyword → distance (nearby radius, or plain annotation),
    /// then display order.
    pub fn run(&self, bins: &[WasteBin]) -> Vec<ListedBin> {
        let filtered = filter_by_region(bins, self.region);
        let filtered = search_by_keyword(&filtered, &self.keyword);

        let mut rows: Vec<ListedBin> = match self.user_location {
            Some((lat, lng)) if self.nearby => geo::find_nearby(&filtered, lat, lng, self.radius(), None)
                .into_iter()
                .map(ListedBin::from)
                .collect(),
            Some((lat, lng)) => geo::annotate_distance(&filtered, lat, lng)
                .into_iter()
                .map(ListedBin::from)
                .collect(),
            None => filtered
                .into_iter()
                .map(|bin| ListedBin { bin, distance_m: None })
                .collect(),
        };

        sort_for_display(&mut rows);
        rows
    }
}

/// Nearest first when any distance is known, otherwise by region then name.
pub fn sort_for_display(rows: &mut [ListedBin]) {
    if rows.iter().any(|r| r.distance_m.is_some()) {
        rows.sort_by(|a, b| match (a.distance_m, b.distance_m) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    } else {
        rows.sort_by(|a, b| {
            a.bin.region.name()
                .cmp(b.bin.region.name())
                .then_with(|| match (&a.bin.name, &b.bin.name) {
                    (Some(x), Some(y)) => x.cmp(y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
        });
    }
}

/// The visible slice of a result list.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub total: usize,
    pub shown: usize,
    pub has_more: bool,
    pub items: Vec<T>,
}

/// First `limit` rows of `rows`.
pub fn paginate<T>(rows: Vec<T>, limit: usize) -> Page<T> {
    let total = rows.len();
    let items: Vec<T> = rows.into_iter().take(limit).collect();
    Page {
        total,
        shown: items.len(),
        has_more: total > limit,
        items,
    }
}
