//! Blocking HTTP clients for the external services.
//!
//! Each client owns a `ureq::Agent` with its own timeout. Call them from
//! `spawn_blocking` when running inside the async server.

pub mod guidance;
pub mod local_search;
pub mod open_data;
pub mod types;
pub mod vision;

pub use guidance::{ConfidenceGrade, ConfidenceTier, GuidanceClient, GuidanceOutcome, GuidanceRequest};
pub use local_search::{LocalSearchClient, Shop};
pub use open_data::{extract_items, OpenDataClient, OpenDataPayload, OpenDataQuery, ResponseFormat, Service};
pub use types::{ClientError, Language};
pub use vision::{Classification, VisionClient};
