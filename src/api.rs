//! Client for the remote assessment server.
//!
//! Every endpoint answers JSON (the CV upload is sent as multipart). Bodies are read as
//! text first so that error responses can be turned into a single readable message,
//! then parsed into `serde_json::Value` and normalised by the `domain` constructors.
//!
//! Calls are instrumented with ids and sizes only; passwords and answer payloads are
//! never logged.

use std::time::Duration;

use axum::http::StatusCode;
use rand::Rng;
use reqwest::header::USER_AGENT;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Url};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::RemoteConfig;
use crate::domain::{AnswerSet, Credentials, CvReceipt, CvSubmission, GeneratedTest, Job, SignIn, SubmissionResult, User};
use crate::error::{extract_error_message, PortalError, Result};
use crate::util::trunc_for_log;

#[derive(Clone)]
pub struct AssessmentApi {
  client: reqwest::Client,
  base_url: Url,
  user_agent: String,
  max_retries: u32,
  backoff_base: Duration,
}

/// Whether a failed attempt may be repeated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Replay {
  /// Reads: retry on transport errors, timeouts, 429 and 5xx.
  Safe,
  /// Writes: retry only if the request never reached the server.
  ConnectOnly,
}

struct AttemptError {
  error: PortalError,
  /// False when the connection could not be established at all.
  reached_server: bool,
}

impl AssessmentApi {
  pub fn new(cfg: &RemoteConfig) -> Result<Self> {
    let base_url = Url::parse(cfg.base())
      .map_err(|e| PortalError::Validation(format!("invalid assessment base URL '{}': {}", cfg.base_url, e)))?;
    if base_url.cannot_be_a_base() {
      return Err(PortalError::Validation(format!("assessment base URL '{}' cannot carry paths", cfg.base_url)));
    }
    let client = reqwest::Client::builder()
      .timeout(cfg.timeout())
      .build()
      .map_err(|e| PortalError::Transport(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      user_agent: cfg.user_agent.clone(),
      max_retries: cfg.max_retries,
      backoff_base: Duration::from_millis(cfg.backoff_base_ms),
    })
  }

  pub fn base_url(&self) -> &str {
    self.base_url.as_str()
  }

  fn url(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  // --- Endpoints ---

  /// POST /signup. Returns the server's confirmation message.
  #[instrument(level = "info", skip(self, creds, cancel), fields(role = %creds.role))]
  pub async fn signup(&self, creds: &Credentials, cancel: &CancelToken) -> Result<String> {
    let url = self.url(&["signup"]);
    let v = self
      .send("signup", Replay::ConnectOnly, cancel, || self.client.post(url.clone()).json(creds))
      .await?;
    Ok(
      v.get("message")
        .and_then(Value::as_str)
        .unwrap_or("Account created")
        .to_string(),
    )
  }

  /// POST /signin.
  #[instrument(level = "info", skip(self, creds, cancel))]
  pub async fn signin(&self, creds: &SignIn, cancel: &CancelToken) -> Result<User> {
    let url = self.url(&["signin"]);
    let body = json!({ "email": creds.email.trim(), "password": creds.password });
    let v = self
      .send("signin", Replay::ConnectOnly, cancel, || self.client.post(url.clone()).json(&body))
      .await?;
    User::from_signin(&v)
  }

  /// POST /generate_test.
  #[instrument(level = "info", skip(self, cancel), fields(%user_id))]
  pub async fn generate_test(&self, user_id: &str, cancel: &CancelToken) -> Result<GeneratedTest> {
    let url = self.url(&["generate_test"]);
    let body = json!({ "user_id": user_id });
    let v = self
      .send("generate_test", Replay::ConnectOnly, cancel, || self.client.post(url.clone()).json(&body))
      .await?;
    let test = GeneratedTest::from_value(&v)?;
    info!(target: "assessment", questions = test.questions.len(), document_id = ?test.document_id, "Test generated");
    Ok(test)
  }

  /// GET /get_mcqs/{user_id}.
  #[instrument(level = "info", skip(self, cancel), fields(%user_id))]
  pub async fn fetch_mcqs(&self, user_id: &str, cancel: &CancelToken) -> Result<GeneratedTest> {
    let url = self.url(&["get_mcqs", user_id]);
    let v = self
      .send("get_mcqs", Replay::Safe, cancel, || self.client.get(url.clone()))
      .await?;
    GeneratedTest::from_value(&v)
  }

  /// POST /submit_answers. The raw body is returned: it is both the source of the
  /// result id and the fallback result.
  #[instrument(level = "info", skip(self, answers, cancel), fields(user_id = %answers.user_id, mcq_id = %answers.mcq_id, answers = answers.answers.len()))]
  pub async fn submit_answers(&self, answers: &AnswerSet, cancel: &CancelToken) -> Result<Value> {
    let url = self.url(&["submit_answers"]);
    self
      .send("submit_answers", Replay::ConnectOnly, cancel, || self.client.post(url.clone()).json(answers))
      .await
  }

  /// GET /get_result_by_id?result_id=...
  #[instrument(level = "info", skip(self, cancel), fields(%result_id))]
  pub async fn fetch_result(&self, result_id: &str, cancel: &CancelToken) -> Result<SubmissionResult> {
    let url = self.url(&["get_result_by_id"]);
    let v = self
      .send("get_result_by_id", Replay::Safe, cancel, || {
        self.client.get(url.clone()).query(&[("result_id", result_id)])
      })
      .await?;
    SubmissionResult::from_value(&v)
  }

  /// GET /jobs.
  #[instrument(level = "info", skip(self, cancel))]
  pub async fn list_jobs(&self, cancel: &CancelToken) -> Result<Vec<Job>> {
    let url = self.url(&["jobs"]);
    let v = self.send("jobs", Replay::Safe, cancel, || self.client.get(url.clone())).await?;
    let jobs = Job::list_from_value(&v)?;
    debug!(target: "assessment", count = jobs.len(), "Jobs listed");
    Ok(jobs)
  }

  /// POST /submit-user-data as multipart form. The form is rebuilt per attempt.
  #[instrument(level = "info", skip(self, sub, cancel), fields(job_id = %sub.job_id, has_cv = sub.cv.is_some()))]
  pub async fn submit_user_data(&self, sub: &CvSubmission, cancel: &CancelToken) -> Result<CvReceipt> {
    let url = self.url(&["submit-user-data"]);
    // Validate the content type once so the per-attempt builder cannot fail.
    if let Some(ct) = sub.cv.as_ref().and_then(|cv| cv.content_type.as_deref()) {
      Part::bytes(Vec::new())
        .mime_str(ct)
        .map_err(|_| PortalError::Validation(format!("Unsupported CV content type '{}'", ct)))?;
    }
    let v = self
      .send("submit-user-data", Replay::ConnectOnly, cancel, || {
        self.client.post(url.clone()).multipart(cv_form(sub))
      })
      .await?;
    Ok(CvReceipt {
      success: v.get("success").and_then(Value::as_bool).unwrap_or(true),
      message: v
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string(),
    })
  }

  // --- Transport ---

  /// Send with bounded retries, exponential backoff and cancellation.
  async fn send<F>(&self, op: &'static str, replay: Replay, cancel: &CancelToken, build: F) -> Result<Value>
  where
    F: Fn() -> RequestBuilder,
  {
    let mut attempt: u32 = 0;
    loop {
      if cancel.is_cancelled() {
        return Err(PortalError::Cancelled);
      }
      let req = build().header(USER_AGENT, self.user_agent.as_str());
      let start = std::time::Instant::now();
      let outcome = tokio::select! {
        _ = cancel.cancelled() => return Err(PortalError::Cancelled),
        r = execute_once(req) => r,
      };
      let elapsed = start.elapsed();

      let failure = match outcome {
        Ok(v) => {
          debug!(target: "assessment_portal", op, attempt, ?elapsed, "Remote call succeeded");
          return Ok(v);
        }
        Err(f) => f,
      };

      let retryable = match replay {
        Replay::Safe => !failure.reached_server || failure.error.is_transient(),
        Replay::ConnectOnly => !failure.reached_server,
      };
      if !retryable || attempt >= self.max_retries {
        warn!(target: "assessment_portal", op, attempt, ?elapsed, error = %failure.error, "Remote call failed");
        return Err(failure.error);
      }

      attempt += 1;
      let delay = self.backoff(attempt);
      warn!(target: "assessment_portal", op, attempt, delay_ms = delay.as_millis() as u64, error = %failure.error, "Remote call failed; retrying");
      tokio::select! {
        _ = cancel.cancelled() => return Err(PortalError::Cancelled),
        _ = tokio::time::sleep(delay) => {}
      }
    }
  }

  /// base * 2^(attempt-1) plus up to 50% jitter.
  fn backoff(&self, attempt: u32) -> Duration {
    let base = self.backoff_base.as_millis() as u64;
    let exp = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let jitter = if base > 1 { rand::thread_rng().gen_range(0..base / 2 + 1) } else { 0 };
    Duration::from_millis(exp + jitter)
  }
}

async fn execute_once(req: RequestBuilder) -> std::result::Result<Value, AttemptError> {
  let res = req.send().await.map_err(|e| AttemptError {
    reached_server: !e.is_connect(),
    error: e.into(),
  })?;

  // reqwest and axum ship different `http` majors; error helpers use axum's.
  let status = StatusCode::from_u16(res.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
  let body = res.text().await.map_err(|e| AttemptError { reached_server: true, error: e.into() })?;

  if !status.is_success() {
    debug!(target: "assessment_portal", %status, body = %trunc_for_log(&body, 300), "Remote error body");
    return Err(AttemptError {
      reached_server: true,
      error: PortalError::Remote { status: status.as_u16(), message: extract_error_message(status, &body) },
    });
  }
  if body.trim().is_empty() {
    return Ok(Value::Null);
  }
  serde_json::from_str::<Value>(&body).map_err(|e| AttemptError {
    reached_server: true,
    error: PortalError::Malformed(format!("{} (body: {})", e, trunc_for_log(&body, 120))),
  })
}

fn cv_form(sub: &CvSubmission) -> Form {
  let mut form = Form::new()
    .text("name", sub.name.trim().to_string())
    .text("email", sub.email.trim().to_string())
    .text("phone", sub.phone.trim().to_string())
    .text("experience", sub.experience.clone())
    .text("education", sub.education.clone())
    .text("skills", sub.skills.clone())
    .text("jobId", sub.job_id.clone())
    .text("jobTitle", sub.job_title.clone());
  if let Some(cv) = &sub.cv {
    let mut part = Part::bytes(cv.bytes.clone()).file_name(cv.file_name.clone());
    if let Some(ct) = &cv.content_type {
      // Checked up front in submit_user_data.
      part = match part.mime_str(ct) {
        Ok(p) => p,
        Err(_) => Part::bytes(cv.bytes.clone()).file_name(cv.file_name.clone()),
      };
    }
    form = form.part("cvFile", part);
  }
  form
}
