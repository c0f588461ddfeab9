mod handlers;
pub mod session;
pub mod state;
mod static_files;

use std::sync::Arc;

use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};

pub use state::AppState;

use session::{session_cookie, session_id_from_headers, SessionId};

/// Largest accepted image upload.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Attach the caller's session to the request, creating one (and its cookie) when needed.
async fn with_session(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let cookie = session_id_from_headers(req.headers());
    let (id, created) = state.sessions.resolve(cookie);
    req.extensions_mut().insert(SessionId(id));

    let mut response = next.run(req).await;
    if created {
        match HeaderValue::from_str(&session_cookie(id)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "could not encode session cookie"),
        }
    }
    response
}

pub fn build_router(state: Arc<AppState>) -> Router {
    // only these routes read or write per-browser state
    let stateful = Router::new()
        .route("/api/bins", get(handlers::bins))
        .route("/api/bins/more", post(handlers::bins_more))
        .route("/api/bins/{id}/focus", post(handlers::focus_bin))
        .route("/api/coach", get(handlers::coach))
        .route(
            "/api/coach/image",
            post(handlers::upload_image)
                .delete(handlers::clear_image)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/coach/analyze", post(handlers::analyze))
        .route("/api/session/language", post(handlers::set_language))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), with_session));

    Router::new()
        .route("/", get(handlers::index))
        .route("/style.css", get(handlers::style))
        .route("/app.js", get(handlers::script))
        .route("/api/regions", get(handlers::regions))
        .route("/api/shops", get(handlers::shops))
        .route("/api/collectors", get(handlers::collectors))
        .route("/api/districts", get(handlers::districts))
        .route("/api/dropoff", get(handlers::dropoff))
        .merge(stateful)
        .layer(CorsLayer::permissive())
        // responses depend on the session cookie
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

pub async fn start(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let missing = state.config.missing_features();
    if !missing.is_empty() {
        warn!(features = ?missing, "running without credentials for some features");
    }

    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind to {}", addr))?;

    info!(%addr, "ssdam server listening on http://{}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
