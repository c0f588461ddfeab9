//! Zero-waste shop lookup through a local-business search API.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{info, warn};

use super::types::ClientError;
use crate::config::SearchConfig;

pub const DISPLAY: u32 = 10;
pub const SORT: &str = "random";
pub const QUERY_SUFFIX: &str = "제로웨이스트";

/// One search hit, cleaned for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub title: String,
    pub category: String,
    pub address: String,
    pub link: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    road_address: String,
    #[serde(default)]
    link: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("static pattern"))
}

/// Remove markup such as the `<b>` highlight tags the search API inserts.
pub fn strip_html(text: &str) -> String {
    tag_pattern().replace_all(text, "").into_owned()
}

impl From<SearchItem> for Shop {
    fn from(item: SearchItem) -> Self {
        let address = if item.road_address.trim().is_empty() {
            item.address
        } else {
            item.road_address
        };
        Self {
            title: strip_html(&item.title),
            category: strip_html(&item.category),
            address,
            link: item.link,
        }
    }
}

pub fn search_query(region: &str) -> String {
    format!("{} {}", region.trim(), QUERY_SUFFIX)
}

pub struct LocalSearchClient {
    config: SearchConfig,
    agent: ureq::Agent,
}

impl LocalSearchClient {
    pub fn new(config: SearchConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(concat!("ssdam/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { config, agent }
    }

    /// Shops for a region name. An empty region yields an empty list without a request.
    pub fn shops_in(&self, region: &str) -> Result<Vec<Shop>, ClientError> {
        if region.trim().is_empty() {
            return Ok(Vec::new());
        }
        let id = self
            .config
            .client_id
            .as_deref()
            .ok_or(ClientError::MissingCredential("NAVER_CLIENT_ID"))?;
        let secret = self
            .config
            .client_secret
            .as_deref()
            .ok_or(ClientError::MissingCredential("NAVER_CLIENT_SECRET"))?;

        let response = self
            .agent
            .get(&self.config.endpoint)
            .set("X-Naver-Client-Id", id)
            .set("X-Naver-Client-Secret", secret)
            .query("query", &search_query(region))
            .query("display", &DISPLAY.to_string())
            .query("sort", SORT)
            .call()
            .map_err(|e| {
                let e = ClientError::from(e);
                warn!(region, error = %e, "shop search failed");
                e
            })?;

        let body: SearchResponse = response
            .into_json()
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let shops: Vec<Shop> = body.items.into_iter().map(Shop::from).collect();

        info!(region, count = shops.len(), "shops found");
        Ok(shops)
    }
}
