use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::Extension;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::clients::open_data::{DEFAULT_PAGE, DEFAULT_ROWS};
use crate::clients::guidance::failure_message;
use crate::clients::{
    Classification, ClientError, GuidanceOutcome, Language, OpenDataPayload, OpenDataQuery,
    ResponseFormat, Service, Shop,
};
use crate::dataset::dropoff::DROPOFF_ZOOM;
use crate::dataset::query::{DEFAULT_RADIUS_M, MAX_RADIUS_M, MIN_RADIUS_M};
use crate::dataset::{
    dropoff_spots_from, builtin_dropoff_spots, paginate, parse_region_filter, BinQuery, DatasetError,
    DistrictMap, DropoffSpot, ListedBin, Page, Region, ALL_REGIONS, DEFAULT_CENTER, DEFAULT_ZOOM,
};

use super::session::{BrowseState, CoachError, CoachView, SessionId, Viewport, REGION_ZOOM, USER_NEARBY_ZOOM};
use super::state::AppState;
use super::static_files;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
    feedback_url: String,
}

pub(super) struct ApiError {
    status: StatusCode,
    message: String,
    feedback_url: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
            code: self.status.as_u16(),
            feedback_url: self.feedback_url,
        };
        (self.status, Json(body)).into_response()
    }
}

fn api_error(state: &AppState, status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError {
        status,
        message: msg.into(),
        feedback_url: state.config.feedback_url.clone(),
    }
}

fn client_status(err: &ClientError) -> StatusCode {
    match err {
        ClientError::MissingCredential(_) => StatusCode::SERVICE_UNAVAILABLE,
        ClientError::EmptyInput(_) | ClientError::UnsupportedFilter { .. } => StatusCode::BAD_REQUEST,
        ClientError::Transport(_) | ClientError::Status { .. } | ClientError::Decode(_) => StatusCode::BAD_GATEWAY,
    }
}

fn client_error(state: &AppState, err: ClientError) -> ApiError {
    api_error(state, client_status(&err), err.to_string())
}

fn dataset_error(state: &AppState, err: DatasetError) -> ApiError {
    api_error(state, StatusCode::SERVICE_UNAVAILABLE, err.to_string())
}

fn join_error(state: &AppState, err: tokio::task::JoinError) -> ApiError {
    error!(error = %err, "blocking task failed");
    api_error(state, StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

fn coach_error(state: &AppState, err: CoachError) -> ApiError {
    let status = match err {
        CoachError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        CoachError::Busy => StatusCode::CONFLICT,
        CoachError::NoImage | CoachError::EmptyImage => StatusCode::BAD_REQUEST,
    };
    api_error(state, status, err.to_string())
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn valid_coords(lat: f64, lng: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

// ─── Static file handlers ────────────────────────────────────────

pub async fn index() -> Html<&'static str> {
    Html(static_files::INDEX_HTML)
}

pub async fn style() -> Response {
    (
        [(header::CONTENT_TYPE, "text/css")],
        static_files::STYLE_CSS,
    )
        .into_response()
}

pub async fn script() -> Response {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        static_files::APP_JS,
    )
        .into_response()
}

// ─── GET /api/bins ───────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BinsParams {
    pub region: Option<String>,
    pub q: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(default)]
    pub nearby: bool,
    pub radius: Option<f64>,
}

/// A list row with its display labels.
#[derive(Serialize)]
pub struct BinRow {
    #[serde(flatten)]
    pub listed: ListedBin,
    pub address: Option<String>,
    pub detail_line: String,
    pub distance_text: String,
}

impl From<ListedBin> for BinRow {
    fn from(listed: ListedBin) -> Self {
        Self {
            address: listed.bin.address().map(str::to_string),
            detail_line: listed.bin.detail_line(),
            distance_text: listed.distance_text(),
            listed,
        }
    }
}

#[derive(Serialize)]
pub struct BinsResponse {
    pub state: BrowseState,
    pub region: Option<Region>,
    pub keyword: String,
    pub nearby: bool,
    pub radius_m: f64,
    pub user_location: Option<(f64, f64)>,
    /// "distance" or "region"
    pub ordering: &'static str,
    pub view: Viewport,
    pub selected_bin_id: Option<String>,
    pub message: Option<&'static str>,
    #[serde(flatten)]
    pub page: Page<BinRow>,
}

fn browse_message(lang: Language, total: usize, has_more: bool) -> Option<&'static str> {
    match (lang, total, has_more) {
        (Language::Ko, 0, _) => Some("조건에 맞는 휴지통이 없어요 🥲"),
        (Language::En, 0, _) => Some("No bins match these filters 🥲"),
        (Language::Ko, _, false) => Some("모든 휴지통 정보를 다 불러왔어요 🙂"),
        (Language::En, _, false) => Some("All bins are loaded 🙂"),
        _ => None,
    }
}

pub async fn bins(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(sid)): Extension<SessionId>,
    Query(params): Query<BinsParams>,
) -> Result<Json<BinsResponse>, ApiError> {
    let region = parse_region_filter(params.region.as_deref())
        .map_err(|e| api_error(&state, StatusCode::BAD_REQUEST, e))?;

    let user_location = match (params.lat, params.lng) {
        (Some(lat), Some(lng)) if valid_coords(lat, lng) => Some((lat, lng)),
        (Some(_), Some(_)) => {
            return Err(api_error(&state, StatusCode::BAD_REQUEST,
                "Invalid coordinates. Lat: -90..90, Lng: -180..180"));
        }
        (None, None) => None,
        _ => return Err(api_error(&state, StatusCode::BAD_REQUEST, "Provide both 'lat' and 'lng'")),
    };

    let query = BinQuery {
        region,
        keyword: params.q.unwrap_or_default(),
        user_location,
        nearby: params.nearby,
        radius_m: params.radius,
    };
    state.sessions.with(sid, |s| s.browse.begin_search(query));

    run_bin_query(&state, sid, "GET /api/bins").await
}

// ─── POST /api/bins/more ─────────────────────────────────────────

pub async fn bins_more(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(sid)): Extension<SessionId>,
) -> Result<Json<BinsResponse>, ApiError> {
    state.sessions.with(sid, |s| s.browse.begin_load_more());
    run_bin_query(&state, sid, "POST /api/bins/more").await
}

async fn run_bin_query(state: &Arc<AppState>, sid: Uuid, route: &str) -> Result<Json<BinsResponse>, ApiError> {
    let start = Instant::now();
    let (query, limit, lang) = state
        .sessions
        .with(sid, |s| (s.browse.query.clone(), s.browse.list_limit, s.language));

    let shared = Arc::clone(state);
    let q = query.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Page<ListedBin>, DatasetError> {
        let bins = shared.bins.shared()?;
        Ok(paginate(q.run(bins), limit))
    })
    .await
    .map_err(|e| join_error(state, e))?;

    let page = match result {
        Ok(page) => page,
        Err(e) => {
            state.sessions.with(sid, |s| s.browse.finish(Err(e.to_string())));
            error!(route, error = %e, "bin dataset unavailable");
            return Err(dataset_error(state, e));
        }
    };

    let (browse_state, view, selected_bin_id) = state.sessions.with(sid, |s| {
        s.browse.finish(Ok(()));
        (s.browse.state, s.browse.map_view(), s.browse.selected_bin_id.clone())
    });

    let ordering = if page.items.iter().any(|r| r.distance_m.is_some()) { "distance" } else { "region" };
    info!(
        route,
        region = query.region.map(Region::name).unwrap_or(ALL_REGIONS),
        keyword = %query.keyword,
        nearby = query.is_nearby(),
        total = page.total,
        shown = page.shown,
        elapsed_ms = elapsed_ms(start),
        "bins listed"
    );

    Ok(Json(BinsResponse {
        state: browse_state,
        region: query.region,
        nearby: query.is_nearby(),
        radius_m: query.radius(),
        user_location: query.user_location,
        ordering,
        view,
        selected_bin_id,
        message: browse_message(lang, page.total, page.has_more),
        keyword: query.keyword,
        page: Page {
            total: page.total,
            shown: page.shown,
            has_more: page.has_more,
            items: page.items.into_iter().map(BinRow::from).collect(),
        },
    }))
}

// ─── POST /api/bins/{id}/focus ───────────────────────────────────

#[derive(Serialize)]
pub struct FocusResponse {
    pub selected_bin_id: String,
    pub view: Viewport,
}

pub async fn focus_bin(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(sid)): Extension<SessionId>,
    Path(id): Path<String>,
) -> Result<Json<FocusResponse>, ApiError> {
    let shared = Arc::clone(&state);
    let lookup = id.clone();
    let found = tokio::task::spawn_blocking(move || shared.bins.find(&lookup))
        .await
        .map_err(|e| join_error(&state, e))?
        .map_err(|e| dataset_error(&state, e))?;

    let bin = found.ok_or_else(|| api_error(&state, StatusCode::NOT_FOUND, format!("Unknown bin '{}'", id)))?;
    let view = state.sessions.with(sid, |s| {
        s.browse.focus(&bin);
        s.browse.map_view()
    });

    info!(route = "POST /api/bins/{id}/focus", id = %bin.id, "bin focused");
    Ok(Json(FocusResponse { selected_bin_id: bin.id, view }))
}

// ─── GET /api/regions ────────────────────────────────────────────

#[derive(Serialize)]
pub struct RegionInfo {
    pub name: &'static str,
    pub view: Viewport,
}

#[derive(Serialize)]
pub struct RegionsResponse {
    pub regions: Vec<RegionInfo>,
    pub radius: RadiusRange,
}

#[derive(Serialize)]
pub struct RadiusRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

pub async fn regions() -> Json<RegionsResponse> {
    let mut regions = vec![RegionInfo {
        name: ALL_REGIONS,
        view: Viewport { lat: DEFAULT_CENTER.0, lng: DEFAULT_CENTER.1, zoom: DEFAULT_ZOOM },
    }];
    regions.extend(Region::ALL.into_iter().map(|r| {
        let (lat, lng) = r.center();
        RegionInfo { name: r.name(), view: Viewport { lat, lng, zoom: REGION_ZOOM } }
    }));
    Json(RegionsResponse {
        regions,
        radius: RadiusRange { min: MIN_RADIUS_M, max: MAX_RADIUS_M, default: DEFAULT_RADIUS_M },
    })
}

// ─── Coaching ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct CoachResponse {
    #[serde(flatten)]
    pub view: CoachView,
    pub lang: Language,
    pub feedback_url: String,
}

fn coach_response(state: &AppState, sid: Uuid) -> Json<CoachResponse> {
    let (view, lang) = state.sessions.with(sid, |s| (s.coach.view(), s.language));
    Json(CoachResponse { view, lang, feedback_url: state.config.feedback_url.clone() })
}

/// GET /api/coach
pub async fn coach(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(sid)): Extension<SessionId>,
) -> Json<CoachResponse> {
    coach_response(&state, sid)
}

/// POST /api/coach/image (raw image body)
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(sid)): Extension<SessionId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CoachResponse>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let size = body.len();

    state
        .sessions
        .with(sid, |s| s.coach.select_image(body.to_vec(), &content_type))
        .map_err(|e| coach_error(&state, e))?;

    info!(route = "POST /api/coach/image", content_type = %content_type, size, "image uploaded");
    Ok(coach_response(&state, sid))
}

/// DELETE /api/coach/image
pub async fn clear_image(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(sid)): Extension<SessionId>,
) -> Json<CoachResponse> {
    state.sessions.with(sid, |s| s.coach.clear());
    coach_response(&state, sid)
}

/// Classify `image`, then generate guidance, recording each outcome on the
/// session. Runs to completion even if the caller goes away. Returns the
/// classification time in milliseconds.
async fn run_analysis(state: Arc<AppState>, sid: Uuid, image: Vec<u8>) -> f64 {
    let start = Instant::now();

    let vision = Arc::clone(&state.vision);
    let classification = match tokio::task::spawn_blocking(move || vision.classify(&image)).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "classifier task failed");
            Classification::error(format!("이미지 분석이 중단되었습니다: {}", e))
        }
    };
    let classified_ms = elapsed_ms(start);

    let request = state.sessions.with(sid, |s| {
        s.coach.finish_classify(classification);
        let lang = s.language;
        s.coach.begin_guidance(lang)
    });

    if let Some(request) = request {
        let lang = request.language;
        let guidance = Arc::clone(&state.guidance);
        let outcome = match tokio::task::spawn_blocking(move || guidance.generate(&request)).await {
            Ok(o) => o,
            Err(e) => {
                error!(error = %e, "guidance task failed");
                GuidanceOutcome::Failed(failure_message(lang, &ClientError::Transport(e.to_string())))
            }
        };
        state.sessions.with(sid, |s| s.coach.finish_guidance(outcome));
    }

    classified_ms
}

/// POST /api/coach/analyze: classify the uploaded image, then generate guidance.
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(sid)): Extension<SessionId>,
) -> Result<Json<CoachResponse>, ApiError> {
    let start = Instant::now();

    let image = state
        .sessions
        .with(sid, |s| s.coach.begin_classify())
        .map_err(|e| coach_error(&state, e))?;

    // detached: a dropped request must not leave the session in flight
    let task = tokio::spawn(run_analysis(Arc::clone(&state), sid, image));
    let classified_ms = match task.await {
        Ok(ms) => ms,
        Err(e) => {
            state.sessions.with(sid, |s| s.coach.abort(format!("이미지 분석이 중단되었습니다: {}", e)));
            return Err(join_error(&state, e));
        }
    };

    let response = coach_response(&state, sid);
    info!(
        route = "POST /api/coach/analyze",
        state = ?response.view.state,
        classified_ms,
        elapsed_ms = elapsed_ms(start),
        "image analysed"
    );
    Ok(response)
}

// ─── POST /api/session/language ──────────────────────────────────

#[derive(Deserialize)]
pub struct LanguageBody {
    pub lang: String,
}

#[derive(Serialize)]
pub struct LanguageResponse {
    pub lang: Language,
}

pub async fn set_language(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(sid)): Extension<SessionId>,
    Json(body): Json<LanguageBody>,
) -> Json<LanguageResponse> {
    let lang = Language::from_code(&body.lang);
    state.sessions.with(sid, |s| s.language = lang);
    Json(LanguageResponse { lang })
}

// ─── GET /api/shops ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ShopsParams {
    pub region: Option<String>,
}

#[derive(Serialize)]
pub struct ShopsResponse {
    pub region: String,
    pub count: usize,
    pub shops: Vec<Shop>,
}

pub async fn shops(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ShopsParams>,
) -> Result<Json<ShopsResponse>, ApiError> {
    let start = Instant::now();
    let region = params.region.unwrap_or_default().trim().to_string();

    let search = Arc::clone(&state.search);
    let lookup = region.clone();
    let shops = tokio::task::spawn_blocking(move || search.shops_in(&lookup))
        .await
        .map_err(|e| join_error(&state, e))?
        .map_err(|e| client_error(&state, e))?;

    info!(route = "GET /api/shops", region = %region, count = shops.len(), elapsed_ms = elapsed_ms(start), "shops listed");
    Ok(Json(ShopsResponse { region, count: shops.len(), shops }))
}

// ─── GET /api/collectors ─────────────────────────────────────────

#[derive(Serialize)]
pub struct CollectorsResponse {
    pub service: Service,
    pub page: u32,
    pub rows: u32,
    pub items: Vec<Value>,
    pub payload: OpenDataPayload,
}

fn parse_number(state: &AppState, params: &HashMap<String, String>, key: &str, default: u32) -> Result<u32, ApiError> {
    match params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| api_error(state, StatusCode::BAD_REQUEST, format!("Invalid '{}': {}", key, v))),
    }
}

/// Build an open-data query from raw query parameters. Every parameter other
/// than service/page/rows/format is treated as a filter.
fn collectors_query(state: &AppState, params: &HashMap<String, String>) -> Result<OpenDataQuery, ApiError> {
    let service = match params.get("service").map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Service::RecyclingCollectors,
        Some(name) => Service::from_name(name)
            .ok_or_else(|| api_error(state, StatusCode::BAD_REQUEST, format!("Unknown service '{}'", name)))?,
    };

    let mut query = OpenDataQuery::new(service)
        .page(parse_number(state, params, "page", DEFAULT_PAGE)?)
        .rows(parse_number(state, params, "rows", DEFAULT_ROWS)?)
        .format(params.get("format").map(|f| ResponseFormat::parse(f)).unwrap_or_default());

    let mut filters: Vec<(&String, &String)> = params
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "service" | "page" | "rows" | "format"))
        .collect();
    filters.sort();
    for (field, value) in filters {
        query = query.filter(field, value).map_err(|e| client_error(state, e))?;
    }
    Ok(query)
}

pub async fn collectors(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CollectorsResponse>, ApiError> {
    let start = Instant::now();
    let query = collectors_query(&state, &params)?;

    let client = Arc::clone(&state.open_data);
    let request = query.clone();
    let payload = tokio::task::spawn_blocking(move || client.fetch(&request))
        .await
        .map_err(|e| join_error(&state, e))?
        .map_err(|e| client_error(&state, e))?;

    let items = payload.items();
    info!(
        route = "GET /api/collectors",
        service = %query.service,
        records = items.len(),
        elapsed_ms = elapsed_ms(start),
        "open data listed"
    );
    Ok(Json(CollectorsResponse {
        service: query.service,
        page: query.page,
        rows: query.rows,
        items,
        payload,
    }))
}

// ─── GET /api/districts ──────────────────────────────────────────

pub async fn districts(State(state): State<Arc<AppState>>) -> Result<Json<DistrictMap>, ApiError> {
    let shared = Arc::clone(&state);
    let map = tokio::task::spawn_blocking(move || shared.districts().cloned())
        .await
        .map_err(|e| join_error(&state, e))?
        .map_err(|e| dataset_error(&state, e))?;
    Ok(Json(map))
}

// ─── GET /api/dropoff ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DropoffParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Serialize)]
pub struct DropoffRow {
    #[serde(flatten)]
    pub spot: DropoffSpot,
    pub distance_m: Option<f64>,
}

#[derive(Serialize)]
pub struct DropoffResponse {
    pub view: Viewport,
    pub user_location: Option<(f64, f64)>,
    pub spots: Vec<DropoffRow>,
}

pub async fn dropoff(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DropoffParams>,
) -> Result<Json<DropoffResponse>, ApiError> {
    let user_location = match (params.lat, params.lng) {
        (Some(lat), Some(lng)) if valid_coords(lat, lng) => Some((lat, lng)),
        (None, None) => None,
        _ => {
            return Err(api_error(&state, StatusCode::BAD_REQUEST,
                "Provide valid 'lat' and 'lng' together"));
        }
    };

    let response = match user_location {
        Some((lat, lng)) => DropoffResponse {
            view: Viewport { lat, lng, zoom: USER_NEARBY_ZOOM },
            user_location,
            spots: dropoff_spots_from(lat, lng)
                .into_iter()
                .map(|w| DropoffRow { spot: w.item, distance_m: Some(w.distance_m) })
                .collect(),
        },
        None => DropoffResponse {
            view: Viewport { lat: DEFAULT_CENTER.0, lng: DEFAULT_CENTER.1, zoom: DROPOFF_ZOOM },
            user_location,
            spots: builtin_dropoff_spots()
                .into_iter()
                .map(|spot| DropoffRow { spot, distance_m: None })
                .collect(),
        },
    };
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn state() -> AppState {
        AppState::new(AppConfig::offline("/nonexistent"))
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_collectors_query_defaults() {
        let q = collectors_query(&state(), &params(&[])).ok().unwrap();
        assert_eq!(q.service, Service::RecyclingCollectors);
        assert_eq!(q.page, DEFAULT_PAGE);
        assert_eq!(q.rows, DEFAULT_ROWS);
        assert_eq!(q.format, ResponseFormat::Json);
    }

    #[test]
    fn test_collectors_query_filters() {
        let q = collectors_query(
            &state(),
            &params(&[("service", "dropoff-points"), ("signguCd", "11170"), ("rows", "20")]),
        )
        .ok()
        .unwrap();
        assert_eq!(q.service, Service::DropoffPoints);
        assert_eq!(q.rows, 20);
        assert_eq!(q.filters().get("signguCd").map(String::as_str), Some("11170"));
    }

    #[test]
    fn test_collectors_query_rejects_unknown_filter() {
        let err = collectors_query(&state(), &params(&[("kndNm", "x"), ("bogus", "1")]))
            .err()
            .unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("bogus"));
    }

    #[test]
    fn test_client_status_mapping() {
        assert_eq!(client_status(&ClientError::MissingCredential("K")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(client_status(&ClientError::Transport("t".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            client_status(&ClientError::UnsupportedFilter { service: "s".into(), field: "f".into() }),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_browse_messages() {
        assert_eq!(browse_message(Language::Ko, 0, false), Some("조건에 맞는 휴지통이 없어요 🥲"));
        assert_eq!(browse_message(Language::En, 30, true), None);
        assert_eq!(browse_message(Language::Ko, 3, false), Some("모든 휴지통 정보를 다 불러왔어요 🙂"));
    }
}
