//! Loading portal configuration (remote assessment server + local server settings) from TOML.
//!
//! Resolution order: built-in defaults, then the TOML file named by PORTAL_CONFIG_PATH,
//! then individual environment overrides (ASSESSMENT_BASE_URL, ASSESSMENT_TIMEOUT_SECS,
//! PORT, STATIC_DIR, SESSION_IDLE_SECS, LOG_LEVEL, LOG_FORMAT).
//!
//! Loading happens before tracing is up, so the outcome is returned as a `ConfigSource`
//! and logged by the caller once the subscriber exists.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PortalConfig {
  #[serde(default)]
  pub remote: RemoteConfig,
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

/// Where and how to reach the remote assessment server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  pub base_url: String,
  pub timeout_secs: u64,
  /// Extra attempts after the first one; 0 disables retries.
  pub max_retries: u32,
  pub backoff_base_ms: u64,
  pub user_agent: String,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      base_url: "http://127.0.0.1:8000".into(),
      timeout_secs: 20,
      max_retries: 2,
      backoff_base_ms: 250,
      user_agent: format!("assessment-portal/{}", env!("CARGO_PKG_VERSION")),
    }
  }
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs.max(1))
  }

  /// Base URL without a trailing slash so paths can be appended verbatim.
  pub fn base(&self) -> &str {
    self.base_url.trim_end_matches('/')
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub port: u16,
  pub static_dir: String,
  /// Sessions untouched for this long are signed out.
  pub session_idle_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self { port: 3000, static_dir: "./static".into(), session_idle_secs: 30 * 60 }
  }
}

impl ServerConfig {
  pub fn session_idle(&self) -> Duration {
    Duration::from_secs(self.session_idle_secs.max(1))
  }
}

pub const DEFAULT_LOG_DIRECTIVES: &str = "info,assessment=debug,assessment_portal=debug,tower_http=info,axum=info";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
  #[default]
  Pretty,
  Json,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// EnvFilter directives, e.g. "debug" or "info,assessment=trace".
  pub level: String,
  pub format: LogFormat,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self { level: DEFAULT_LOG_DIRECTIVES.into(), format: LogFormat::Pretty }
  }
}

/// Where the effective config came from.
#[derive(Debug)]
pub enum ConfigSource {
  Defaults,
  File(String),
  /// The file was named but unusable; defaults were used instead.
  Fallback { path: String, error: String },
}

impl ConfigSource {
  pub fn log(&self) {
    match self {
      ConfigSource::Defaults => info!(target: "assessment_portal", "No PORTAL_CONFIG_PATH; using built-in config"),
      ConfigSource::File(path) => info!(target: "assessment_portal", %path, "Loaded portal config (TOML)"),
      ConfigSource::Fallback { path, error } => {
        error!(target: "assessment_portal", %path, %error, "Unusable TOML config; using defaults")
      }
    }
  }
}

/// Load config from PORTAL_CONFIG_PATH (if set) and apply env overrides.
/// A missing or broken file falls back to defaults.
pub fn load_portal_config_from_env() -> (PortalConfig, ConfigSource) {
  let (mut cfg, source) = match std::env::var("PORTAL_CONFIG_PATH") {
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match toml::from_str::<PortalConfig>(&s) {
        Ok(cfg) => (cfg, ConfigSource::File(path)),
        Err(e) => (PortalConfig::default(), ConfigSource::Fallback { path, error: e.to_string() }),
      },
      Err(e) => (PortalConfig::default(), ConfigSource::Fallback { path, error: e.to_string() }),
    },
    Err(_) => (PortalConfig::default(), ConfigSource::Defaults),
  };
  apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
  (cfg, source)
}

fn apply_env_overrides(cfg: &mut PortalConfig, var: impl Fn(&str) -> Option<String>) {
  if let Some(url) = var("ASSESSMENT_BASE_URL").filter(|s| !s.trim().is_empty()) {
    cfg.remote.base_url = url.trim().to_string();
  }
  if let Some(secs) = var("ASSESSMENT_TIMEOUT_SECS").and_then(|raw| raw.trim().parse::<u64>().ok()) {
    cfg.remote.timeout_secs = secs;
  }
  if let Some(port) = var("PORT").and_then(|raw| raw.trim().parse::<u16>().ok()) {
    cfg.server.port = port;
  }
  if let Some(dir) = var("STATIC_DIR").filter(|s| !s.is_empty()) {
    cfg.server.static_dir = dir;
  }
  if let Some(secs) = var("SESSION_IDLE_SECS").and_then(|raw| raw.trim().parse::<u64>().ok()) {
    cfg.server.session_idle_secs = secs;
  }
  if let Some(level) = var("LOG_LEVEL").filter(|s| !s.trim().is_empty()) {
    cfg.logging.level = level;
  }
  match var("LOG_FORMAT").as_deref().map(str::trim) {
    Some("json") => cfg.logging.format = LogFormat::Json,
    Some("pretty") => cfg.logging.format = LogFormat::Pretty,
    _ => {}
  }
}
