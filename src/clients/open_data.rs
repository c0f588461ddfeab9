//! Government open-data lookups (data.go.kr style REST endpoints).
//!
//! Two services share one request shape: service key, paging, a return type
//! and a per-service allow-list of optional filters. A filter outside the
//! allow-list is rejected before any request is sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use super::types::ClientError;
use crate::config::OpenDataConfig;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_ROWS: u32 = 10;
pub const MAX_ROWS: u32 = 1000;

/// Which open-data service to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    /// Recycling collection/recovery businesses (KECO).
    RecyclingCollectors,
    /// Municipal drop-off points, filtered by district codes.
    DropoffPoints,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::RecyclingCollectors, Service::DropoffPoints];

    pub fn name(self) -> &'static str {
        match self {
            Self::RecyclingCollectors => "recycling-collectors",
            Self::DropoffPoints => "dropoff-points",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name.trim())
    }

    /// Optional query parameters this service accepts.
    pub fn allowed_filters(self) -> &'static [&'static str] {
        match self {
            // kind (폐휴대폰, 중소폐가전, ...), region name, address
            Self::RecyclingCollectors => &["kndNm", "rgnNm", "addr"],
            // province code, district code, address
            Self::DropoffPoints => &["ctprvnCd", "signguCd", "addr"],
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Xml,
}

impl ResponseFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }

    /// "json" (any case) is JSON; anything else is passed through as text.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Xml
        }
    }
}

/// A validated request against one service.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenDataQuery {
    pub service: Service,
    pub page: u32,
    pub rows: u32,
    pub format: ResponseFormat,
    filters: BTreeMap<String, String>,
}

impl OpenDataQuery {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            page: DEFAULT_PAGE,
            rows: DEFAULT_ROWS,
            format: ResponseFormat::Json,
            filters: BTreeMap::new(),
        }
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn rows(mut self, rows: u32) -> Self {
        self.rows = rows.clamp(1, MAX_ROWS);
        self
    }

    pub fn format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    /// Add an optional filter. Blank values are dropped; unknown fields are an error.
    pub fn filter(mut self, field: &str, value: &str) -> Result<Self, ClientError> {
        if !self.service.allowed_filters().contains(&field) {
            return Err(ClientError::UnsupportedFilter {
                service: self.service.name().to_string(),
                field: field.to_string(),
            });
        }
        let value = value.trim();
        if !value.is_empty() {
            self.filters.insert(field.to_string(), value.to_string());
        }
        Ok(self)
    }

    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.filters
    }

    /// Query pairs without the service key.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("pageNo".to_string(), self.page.to_string()),
            ("numOfRows".to_string(), self.rows.to_string()),
            ("returnType".to_string(), self.format.as_str().to_string()),
        ];
        params.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

/// Decoded JSON or raw text, following the requested format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "format", content = "body", rename_all = "lowercase")]
pub enum OpenDataPayload {
    Json(Value),
    Text(String),
}

impl OpenDataPayload {
    /// Records inside the envelope; text payloads have none.
    pub fn items(&self) -> Vec<Value> {
        match self {
            Self::Json(v) => extract_items(v),
            Self::Text(_) => Vec::new(),
        }
    }
}

// ─── Envelope ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Option<ResponseNode>,
    #[serde(default)]
    items: Option<Items>,
}

#[derive(Deserialize)]
struct ResponseNode {
    #[serde(default)]
    body: Option<BodyNode>,
}

#[derive(Deserialize)]
struct BodyNode {
    #[serde(default)]
    items: Option<Items>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Items {
    List(Vec<Value>),
    Wrapped { item: OneOrMany },
    // Empty result sets come back as "" on some services
    Other(#[allow(dead_code)] Value),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Value>),
    One(Value),
}

impl Items {
    fn into_vec(self) -> Vec<Value> {
        match self {
            Items::List(list) => list,
            Items::Wrapped { item: OneOrMany::Many(list) } => list,
            Items::Wrapped { item: OneOrMany::One(v) } if v.is_object() => vec![v],
            _ => Vec::new(),
        }
    }
}

/// Pull the record list out of `response.body.items` or a top-level `items`.
///
/// `items` may be the list itself or `{ "item": [...] }`; a single record may
/// arrive as `{ "item": {...} }`. Any other shape yields no records.
pub fn extract_items(payload: &Value) -> Vec<Value> {
    let Ok(envelope) = serde_json::from_value::<Envelope>(payload.clone()) else {
        return Vec::new();
    };
    envelope
        .response
        .and_then(|r| r.body)
        .and_then(|b| b.items)
        .or(envelope.items)
        .map(Items::into_vec)
        .unwrap_or_default()
}

// ─── Client ──────────────────────────────────────────────────────

pub struct OpenDataClient {
    config: OpenDataConfig,
    agent: ureq::Agent,
}

impl OpenDataClient {
    pub fn new(config: OpenDataConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(concat!("ssdam/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { config, agent }
    }

    pub fn base_url(&self, service: Service) -> Result<&str, ClientError> {
        match service {
            Service::RecyclingCollectors => Ok(&self.config.recycling_url),
            Service::DropoffPoints => self
                .config
                .dropoff_url
                .as_deref()
                .ok_or(ClientError::MissingCredential("DROPOFF_INFO_URL")),
        }
    }

    /// Run one query. Missing credentials fail before any network traffic.
    pub fn fetch(&self, query: &OpenDataQuery) -> Result<OpenDataPayload, ClientError> {
        let key = self
            .config
            .service_key
            .as_deref()
            .ok_or(ClientError::MissingCredential("RECYCLE_INFO_KEY"))?;
        let url = self.base_url(query.service)?;

        let mut request = self.agent.get(url).query("serviceKey", key);
        for (k, v) in query.params() {
            request = request.query(&k, &v);
        }
        debug!(service = %query.service, filters = ?query.filters(), page = query.page, "open data request");

        let response = request.call().map_err(|e| {
            let e = ClientError::from(e);
            warn!(service = %query.service, error = %e, "open data request failed");
            e
        })?;

        let payload = match query.format {
            ResponseFormat::Json => OpenDataPayload::Json(
                response
                    .into_json()
                    .map_err(|e| ClientError::Decode(e.to_string()))?,
            ),
            ResponseFormat::Xml => OpenDataPayload::Text(
                response
                    .into_string()
                    .map_err(|e| ClientError::Decode(e.to_string()))?,
            ),
        };

        info!(service = %query.service, records = payload.items().len(), "open data fetched");
        Ok(payload)
    }
}
