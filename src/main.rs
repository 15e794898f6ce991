//! Assessment Portal · Backend-for-frontend
//!
//! - Axum HTTP + WebSocket API for the personality test (TVET) and job application (ADOF) flows
//! - Retrying client for the remote assessment server
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                    : u16 (default 3000)
//!   ASSESSMENT_BASE_URL     : remote assessment server, default "http://127.0.0.1:8000"
//!   ASSESSMENT_TIMEOUT_SECS : per-request timeout, default 20
//!   PORTAL_CONFIG_PATH      : path to TOML config (remote + server sections)
//!   STATIC_DIR              : SPA directory, default "./static"
//!   SESSION_IDLE_SECS       : idle time before a session is dropped, default 1800
//!   LOG_LEVEL               : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT              : "pretty" (default) or "json"

mod telemetry;
mod util;
mod config;
mod error;
mod ids;
mod likert;
mod domain;
mod answers;
mod cancel;
mod api;
mod session;
mod state;
mod logic;
mod report;
mod protocol;
mod routes;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

const SESSION_SWEEP_EVERY: Duration = Duration::from_secs(60);

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // Config first: it carries the logging setup.
  let (config, source) = config::load_portal_config_from_env();
  telemetry::init_tracing(&config.logging);
  source.log();

  let state = Arc::new(AppState::new(config)?);
  let addr = SocketAddr::from(([0, 0, 0, 0], state.config.server.port));

  // Reclaim sessions of users who left without signing out.
  tokio::spawn(state.sessions.clone().run_sweeper(SESSION_SWEEP_EVERY));

  let app = build_router(state);

  let listener = TcpListener::bind(addr).await?;
  info!(target: "assessment_portal", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
