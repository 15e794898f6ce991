//! Error taxonomy for the portal and its HTTP rendering.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
  /// The remote server could not be reached or the connection broke mid-request.
  #[error("Network error: {0}")]
  Transport(String),

  /// The remote server answered with a non-2xx status.
  #[error("{message}")]
  Remote { status: u16, message: String },

  /// A 2xx response whose body was not the JSON we expected.
  #[error("Unexpected response from server: {0}")]
  Malformed(String),

  /// A successful response that lacks an identifier needed by the next step.
  #[error("{0}")]
  MissingIdentifier(String),

  /// Local validation failed before anything was sent.
  #[error("{0}")]
  Validation(String),

  #[error("Not signed in")]
  Unauthorized,

  #[error("Another request is already in progress")]
  Busy,

  #[error("The assessment server did not respond in time")]
  Timeout,

  #[error("Request cancelled")]
  Cancelled,
}

pub type Result<T, E = PortalError> = std::result::Result<T, E>;

impl PortalError {
  pub fn code(&self) -> &'static str {
    match self {
      PortalError::Transport(_) => "NETWORK_ERROR",
      PortalError::Remote { .. } => "REMOTE_ERROR",
      PortalError::Malformed(_) => "MALFORMED_RESPONSE",
      PortalError::MissingIdentifier(_) => "MISSING_IDENTIFIER",
      PortalError::Validation(_) => "VALIDATION_ERROR",
      PortalError::Unauthorized => "UNAUTHORIZED",
      PortalError::Busy => "BUSY",
      PortalError::Timeout => "TIMEOUT",
      PortalError::Cancelled => "CANCELLED",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      PortalError::Transport(_) | PortalError::Malformed(_) | PortalError::Remote { .. } => StatusCode::BAD_GATEWAY,
      PortalError::MissingIdentifier(_) | PortalError::Busy => StatusCode::CONFLICT,
      PortalError::Validation(_) => StatusCode::BAD_REQUEST,
      PortalError::Unauthorized => StatusCode::UNAUTHORIZED,
      PortalError::Timeout => StatusCode::GATEWAY_TIMEOUT,
      PortalError::Cancelled => StatusCode::REQUEST_TIMEOUT,
    }
  }

  /// True for failures worth another attempt against the remote server.
  pub fn is_transient(&self) -> bool {
    match self {
      PortalError::Transport(_) | PortalError::Timeout => true,
      PortalError::Remote { status, .. } => *status == 429 || *status >= 500,
      _ => false,
    }
  }
}

impl From<reqwest::Error> for PortalError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      PortalError::Timeout
    } else if e.is_decode() {
      PortalError::Malformed(e.to_string())
    } else {
      PortalError::Transport(e.to_string())
    }
  }
}

impl IntoResponse for PortalError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(target: "assessment_portal", code = self.code(), error = %self, "Request failed");
    } else {
      tracing::warn!(target: "assessment_portal", code = self.code(), error = %self, "Request rejected");
    }
    let body = Json(json!({
      "error": {
        "code": self.code(),
        "message": self.to_string(),
      }
    }));
    (status, body).into_response()
  }
}

/// Derive one human-readable line from an error body.
///
/// The body is read as text first; if it parses as JSON, `error` (string or
/// `{message}`), then `message`, then `detail` are preferred. Otherwise the raw
/// text is used, and an empty body falls back to the status reason.
pub fn extract_error_message(status: StatusCode, body: &str) -> String {
  let trimmed = body.trim();
  if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
    if let Some(msg) = message_field(&v) {
      return msg;
    }
  }
  if !trimmed.is_empty() {
    return trimmed.to_string();
  }
  match status.canonical_reason() {
    Some(reason) => format!("HTTP {}: {}", status.as_u16(), reason),
    None => format!("HTTP {}", status.as_u16()),
  }
}

fn message_field(v: &Value) -> Option<String> {
  let non_empty = |v: Option<&Value>| {
    v.and_then(Value::as_str)
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(str::to_string)
  };
  if let Some(err) = v.get("error") {
    if let Some(s) = non_empty(Some(err)) {
      return Some(s);
    }
    if let Some(s) = non_empty(err.get("message")) {
      return Some(s);
    }
  }
  non_empty(v.get("message")).or_else(|| non_empty(v.get("detail")))
}
