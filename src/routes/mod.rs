//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::domain::MAX_CV_BYTES;
use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...` (session via `x-session-id`)
/// - Static SPA from the configured directory with index fallback
/// - CORS (allow any origin/method/headers) – adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.server.static_dir.clone();
    let static_service = ServeDir::new(&static_dir)
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new(format!("{}/index.html", static_dir.trim_end_matches('/'))));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/signup", post(http::http_signup))
        .route("/api/v1/signin", post(http::http_signin))
        .route("/api/v1/signout", post(http::http_signout))
        .route("/api/v1/session", get(http::http_session))
        .route("/api/v1/test", post(http::http_acquire_test))
        .route("/api/v1/test/question", get(http::http_question))
        .route("/api/v1/test/answer", post(http::http_answer))
        .route("/api/v1/test/submit", post(http::http_submit))
        .route("/api/v1/result", get(http::http_result))
        .route("/api/v1/jobs", get(http::http_jobs))
        .route("/api/v1/adof/job", post(http::http_select_job))
        .route(
            "/api/v1/adof/application",
            // Room for the CV plus the text fields.
            post(http::http_application).layer(DefaultBodyLimit::max(MAX_CV_BYTES + 64 * 1024)),
        )
        .route("/api/v1/adof/report", get(http::http_report))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}
