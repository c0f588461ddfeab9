//! Per-browser session state.
//!
//! Each session carries its own bin-list state (filters, paging cursor,
//! selection, map viewport) and coaching state (uploaded image, last
//! classification and guidance). Sessions live in process memory only and
//! are dropped after a period of inactivity.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::clients::{Classification, ConfidenceGrade, GuidanceOutcome, GuidanceRequest, Language};
use crate::clients::guidance::format_percent;
use crate::config::DEFAULT_MAX_SESSIONS;
use crate::dataset::{BinQuery, Region, WasteBin, DEFAULT_CENTER, DEFAULT_ZOOM, PAGE_SIZE};

pub const SESSION_COOKIE: &str = "ssdam_session";
pub const SESSION_IDLE_HOURS: i64 = 6;

pub const REGION_ZOOM: u8 = 14;
pub const ITEM_ZOOM: u8 = 18;
pub const USER_NEARBY_ZOOM: u8 = 15;
pub const USER_ZOOM: u8 = 13;

/// Accepted upload content types.
pub const IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

// ─── Map viewport ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub lat: f64,
    pub lng: f64,
    pub zoom: u8,
}

impl Viewport {
    pub fn default_view() -> Self {
        Self { lat: DEFAULT_CENTER.0, lng: DEFAULT_CENTER.1, zoom: DEFAULT_ZOOM }
    }

    pub fn region(region: Region) -> Self {
        let (lat, lng) = region.center();
        Self { lat, lng, zoom: REGION_ZOOM }
    }

    pub fn item(lat: f64, lng: f64) -> Self {
        Self { lat, lng, zoom: ITEM_ZOOM }
    }

    pub fn user(lat: f64, lng: f64, nearby: bool) -> Self {
        let zoom = if nearby { USER_NEARBY_ZOOM } else { USER_ZOOM };
        Self { lat, lng, zoom }
    }
}

// ─── Bin list page ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowseState {
    Idle,
    Searching,
    ResultsReady,
    Error,
}

#[derive(Debug, Clone)]
pub struct BrowseSession {
    pub state: BrowseState,
    pub query: BinQuery,
    pub list_limit: usize,
    pub selected_bin_id: Option<String>,
    pub error: Option<String>,
    viewport: Viewport,
    last_region: Option<Region>,
}

impl Default for BrowseSession {
    fn default() -> Self {
        Self {
            state: BrowseState::Idle,
            query: BinQuery::default(),
            list_limit: PAGE_SIZE,
            selected_bin_id: None,
            error: None,
            viewport: Viewport::default_view(),
            last_region: None,
        }
    }
}

impl BrowseSession {
    /// Start a search with new filters.
    ///
    /// A region different from the previous one recentres the map on it and
    /// clears the selection; going back to all regions restores the default
    /// view. Changed filters reset the list to its first page.
    pub fn begin_search(&mut self, query: BinQuery) {
        if query.region != self.last_region {
            self.viewport = match query.region {
                Some(r) => Viewport::region(r),
                None => Viewport::default_view(),
            };
            self.selected_bin_id = None;
            self.last_region = query.region;
        }
        if query != self.query {
            self.list_limit = PAGE_SIZE;
        }
        self.query = query;
        self.error = None;
        self.state = BrowseState::Searching;
    }

    /// Repeat the current search one page further.
    pub fn begin_load_more(&mut self) {
        self.list_limit += PAGE_SIZE;
        self.error = None;
        self.state = BrowseState::Searching;
    }

    pub fn finish(&mut self, outcome: Result<(), String>) {
        match outcome {
            Ok(()) => {
                self.state = BrowseState::ResultsReady;
                self.error = None;
            }
            Err(e) => {
                self.state = BrowseState::Error;
                self.error = Some(e);
            }
        }
    }

    /// Select a bin and centre the map on it.
    pub fn focus(&mut self, bin: &WasteBin) {
        self.selected_bin_id = Some(bin.id.clone());
        self.viewport = Viewport::item(bin.lat, bin.lng);
    }

    /// The view the map should show. The user's position wins while nothing is selected.
    pub fn map_view(&self) -> Viewport {
        match self.query.user_location {
            Some((lat, lng)) if self.selected_bin_id.is_none() => Viewport::user(lat, lng, self.query.is_nearby()),
            _ => self.viewport,
        }
    }
}

// ─── Coaching page ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoachState {
    Idle,
    ImageSelected,
    Classifying,
    Classified,
    GuidanceGenerating,
    Guided,
    Error,
}

#[derive(Debug, Error, PartialEq)]
pub enum CoachError {
    #[error("업로드된 이미지가 없습니다. 이미지를 먼저 업로드해 주세요.")]
    NoImage,
    #[error("이미지 데이터가 비어있습니다.")]
    EmptyImage,
    #[error("지원하지 않는 이미지 형식입니다: {0} (jpg, jpeg, png만 가능)")]
    UnsupportedType(String),
    #[error("이미 분석이 진행 중입니다.")]
    Busy,
}

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct CoachSession {
    pub state: CoachState,
    image: Option<UploadedImage>,
    classification: Option<Classification>,
    guidance: Option<GuidanceOutcome>,
}

impl Default for CoachSession {
    fn default() -> Self {
        Self { state: CoachState::Idle, image: None, classification: None, guidance: None }
    }
}

/// Normalise a Content-Type header value to its media type.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

impl CoachSession {
    /// Replace the uploaded image. Results from a previous image are dropped.
    pub fn select_image(&mut self, bytes: Vec<u8>, content_type: &str) -> Result<(), CoachError> {
        let media = media_type(content_type);
        if !IMAGE_TYPES.contains(&media.as_str()) {
            return Err(CoachError::UnsupportedType(media));
        }
        if bytes.is_empty() {
            return Err(CoachError::EmptyImage);
        }
        self.image = Some(UploadedImage { bytes, content_type: media });
        self.classification = None;
        self.guidance = None;
        self.state = CoachState::ImageSelected;
        Ok(())
    }

    /// Remove the image and everything derived from it.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn in_flight(&self) -> bool {
        matches!(self.state, CoachState::Classifying | CoachState::GuidanceGenerating)
    }

    /// Enter `classifying` and hand out the image bytes for the classifier.
    pub fn begin_classify(&mut self) -> Result<Vec<u8>, CoachError> {
        if self.in_flight() {
            return Err(CoachError::Busy);
        }
        let bytes = self.image.as_ref().map(|i| i.bytes.clone()).ok_or(CoachError::NoImage)?;
        self.classification = None;
        self.guidance = None;
        self.state = CoachState::Classifying;
        Ok(bytes)
    }

    /// Record the classifier's answer. Ignored if the image was cleared meanwhile.
    pub fn finish_classify(&mut self, result: Classification) {
        if self.state != CoachState::Classifying {
            debug!(state = ?self.state, "dropping stale classification");
            return;
        }
        self.state = if result.is_error() { CoachState::Error } else { CoachState::Classified };
        self.classification = Some(result);
    }

    /// Enter `guidance_generating` and build the request from the classified tag.
    pub fn begin_guidance(&mut self, language: Language) -> Option<GuidanceRequest> {
        if self.state != CoachState::Classified {
            return None;
        }
        let (tag, probability) = self.classification.as_ref()?.tag()?;
        let request = GuidanceRequest::new(tag, Some(probability), language);
        self.state = CoachState::GuidanceGenerating;
        Some(request)
    }

    /// Record generated guidance. Ignored if the image was cleared meanwhile.
    pub fn finish_guidance(&mut self, outcome: GuidanceOutcome) {
        if self.state != CoachState::GuidanceGenerating {
            debug!(state = ?self.state, "dropping stale guidance");
            return;
        }
        self.state = if outcome.is_failure() { CoachState::Error } else { CoachState::Guided };
        self.guidance = Some(outcome);
    }

    /// Give up on an in-flight call: the session moves to `error` with `reason`
    /// so the next analyze can start over. No-op when nothing is in flight.
    pub fn abort(&mut self, reason: impl Into<String>) {
        match self.state {
            CoachState::Classifying => self.classification = Some(Classification::error(reason)),
            CoachState::GuidanceGenerating => self.guidance = Some(GuidanceOutcome::Failed(reason.into())),
            _ => return,
        }
        self.state = CoachState::Error;
    }

    pub fn view(&self) -> CoachView {
        CoachView {
            state: self.state,
            image: self.image.as_ref().map(|i| ImageInfo {
                content_type: i.content_type.clone(),
                size: i.bytes.len(),
            }),
            result: self.classification.as_ref().map(ResultCard::from),
            guidance: self.guidance.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub content_type: String,
    pub size: usize,
}

/// Classification as shown on the result card.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultCard {
    Recognized {
        tag: String,
        probability: f64,
        percent: String,
        grade: &'static str,
    },
    Failed {
        error: String,
    },
}

impl From<&Classification> for ResultCard {
    fn from(c: &Classification) -> Self {
        match c {
            Classification::Tag { tag, probability } => Self::Recognized {
                tag: tag.clone(),
                probability: *probability,
                percent: format_percent(*probability),
                grade: ConfidenceGrade::from_probability(*probability).label(),
            },
            Classification::Error { error } => Self::Failed { error: error.clone() },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoachView {
    pub state: CoachState,
    pub image: Option<ImageInfo>,
    pub result: Option<ResultCard>,
    pub guidance: Option<GuidanceOutcome>,
}

// ─── Session & store ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub language: Language,
    pub browse: BrowseSession,
    pub coach: CoachSession,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            language: Language::default(),
            browse: BrowseSession::default(),
            coach: CoachSession::default(),
            created_at: now,
            last_seen: now,
        }
    }
}

/// All live sessions, keyed by cookie id. Holds at most `capacity` sessions.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    idle: Duration,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::hours(SESSION_IDLE_HOURS), DEFAULT_MAX_SESSIONS)
    }
}

/// Drop least recently seen sessions until one more fits.
fn make_room(sessions: &mut HashMap<Uuid, Session>, capacity: usize) {
    while sessions.len() >= capacity {
        let Some(oldest) = sessions.values().min_by_key(|s| s.last_seen).map(|s| s.id) else {
            break;
        };
        sessions.remove(&oldest);
        debug!(session = %oldest, "session evicted");
    }
}

impl SessionStore {
    pub fn new(idle: Duration, capacity: usize) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), idle, capacity: capacity.max(1) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Find the session for a cookie id, or start a new one.
    /// Returns the id in use and whether it was just created.
    pub fn resolve(&self, cookie: Option<Uuid>) -> (Uuid, bool) {
        self.resolve_at(cookie, Utc::now())
    }

    pub fn resolve_at(&self, cookie: Option<Uuid>, now: DateTime<Utc>) -> (Uuid, bool) {
        let mut sessions = self.lock();
        let cutoff = now - self.idle;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen >= cutoff);
        if sessions.len() < before {
            debug!(pruned = before - sessions.len(), "idle sessions dropped");
        }

        if let Some(id) = cookie {
            if let Some(session) = sessions.get_mut(&id) {
                session.last_seen = now;
                return (id, false);
            }
        }
        make_room(&mut sessions, self.capacity);
        let id = Uuid::new_v4();
        sessions.insert(id, Session::new(id, now));
        (id, true)
    }

    /// Run `f` against a session, recreating it if it was pruned in between.
    pub fn with<R>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.lock();
        if !sessions.contains_key(&id) {
            make_room(&mut sessions, self.capacity);
        }
        let session = sessions.entry(id).or_insert_with(|| Session::new(id, Utc::now()));
        f(session)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The session a request belongs to, attached by the session middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(pub Uuid);

/// Session id from the request's Cookie header(s).
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

/// `Set-Cookie` value for a session id.
pub fn session_cookie(id: Uuid) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}
