use std::sync::{Arc, OnceLock};

use chrono::Duration;
use tracing::warn;

use crate::clients::{GuidanceClient, LocalSearchClient, OpenDataClient, VisionClient};
use crate::config::AppConfig;
use crate::dataset::{load_district_map, BinStore, DatasetError, DistrictMap};

use super::session::{SessionStore, SESSION_IDLE_HOURS};

/// Everything the handlers share. Built once at startup.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub bins: BinStore,
    pub vision: Arc<VisionClient>,
    pub guidance: Arc<GuidanceClient>,
    pub open_data: Arc<OpenDataClient>,
    pub search: Arc<LocalSearchClient>,
    pub sessions: SessionStore,
    districts: OnceLock<DistrictMap>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            vision: Arc::new(VisionClient::new(config.vision.clone())),
            guidance: Arc::new(GuidanceClient::new(config.guidance.clone())),
            open_data: Arc::new(OpenDataClient::new(config.open_data.clone())),
            search: Arc::new(LocalSearchClient::new(config.search.clone())),
            bins: BinStore::new(config.bins_dir()),
            sessions: SessionStore::new(Duration::hours(SESSION_IDLE_HOURS), config.max_sessions),
            config: Arc::new(config),
            districts: OnceLock::new(),
        }
    }

    /// District map, read from disk on first success.
    pub fn districts(&self) -> Result<&DistrictMap, DatasetError> {
        if let Some(map) = self.districts.get() {
            return Ok(map);
        }
        let map = load_district_map(&self.config.districts_dir()).map_err(|e| {
            warn!(error = %e, "district map unavailable");
            e
        })?;
        Ok(self.districts.get_or_init(|| map))
    }
}
