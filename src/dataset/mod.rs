//! Location datasets behind the map pages.
//!
//! Public waste bins merged from district CSVs, the waste-request district
//! map, and the built-in drop-off point list.

pub mod districts;
pub mod dropoff;
pub mod normalize;
pub mod query;
pub mod store;
pub mod types;

pub use districts::{load_district_map, District, DistrictMap};
pub use dropoff::{builtin_dropoff_spots, dropoff_spots_from, DropoffSpot};
pub use query::{filter_by_region, paginate, search_by_keyword, BinQuery, ListedBin, Page, PAGE_SIZE};
pub use store::BinStore;
pub use types::{parse_region_filter, DatasetError, Region, WasteBin, ALL_REGIONS, DEFAULT_CENTER, DEFAULT_ZOOM};
