//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! The session is identified by the `x-session-id` header.

use std::sync::Arc;

use axum::{
  async_trait,
  extract::{FromRequestParts, Multipart, Query, State},
  http::request::Parts,
  Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::domain::{ApplicantDetails, CvFile, SignIn, SubmissionResult, Job};
use crate::error::{PortalError, Result};
use crate::logic::{self, QuestionView, ResolvedResult};
use crate::answers::Progress;
use crate::protocol::*;
use crate::report::AdofReport;
use crate::session::ApplicationRecord;
use crate::state::AppState;
use crate::util::non_blank;

pub const SESSION_HEADER: &str = "x-session-id";

/// Session id taken from the `x-session-id` header.
pub struct SessionId(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionId {
  type Rejection = PortalError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
    parts
      .headers
      .get(SESSION_HEADER)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| Uuid::parse_str(v.trim()).ok())
      .map(SessionId)
      .ok_or(PortalError::Unauthorized)
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> Json<HealthOut> {
  Json(HealthOut { ok: true, sessions: state.sessions.len().await })
}

#[instrument(level = "info", skip(state, body), fields(role = %body.role))]
pub async fn http_signup(State(state): State<Arc<AppState>>, Json(body): Json<SignUpIn>) -> Result<Json<SignUpOut>> {
  let creds = body.into_credentials()?;
  let message = logic::sign_up(&state, &creds, &CancelToken::never()).await?;
  Ok(Json(SignUpOut { message }))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_signin(State(state): State<Arc<AppState>>, Json(body): Json<SignIn>) -> Result<Json<SignInOut>> {
  let ctx = logic::sign_in(&state, &body, &CancelToken::never()).await?;
  Ok(Json(SignInOut { session_id: ctx.id.to_string(), user: ctx.user }))
}

#[instrument(level = "info", skip(state, sid), fields(session_id = %sid.0))]
pub async fn http_signout(State(state): State<Arc<AppState>>, sid: SessionId) -> Result<Json<OkOut>> {
  logic::sign_out(&state, sid.0).await?;
  Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "debug", skip(state, sid), fields(session_id = %sid.0))]
pub async fn http_session(State(state): State<Arc<AppState>>, sid: SessionId) -> Result<Json<SessionOut>> {
  Ok(Json(state.sessions.snapshot(sid.0).await?.into()))
}

#[instrument(level = "info", skip(state, sid), fields(session_id = %sid.0))]
pub async fn http_acquire_test(State(state): State<Arc<AppState>>, sid: SessionId) -> Result<Json<TestOut>> {
  let test = logic::acquire_test(&state, sid.0, &CancelToken::never()).await?;
  info!(target: "assessment", session_id = %sid.0, questions = test.questions.len(), "HTTP test served");
  Ok(Json(test.into()))
}

#[instrument(level = "debug", skip(state, sid), fields(session_id = %sid.0, index = q.index))]
pub async fn http_question(
  State(state): State<Arc<AppState>>,
  sid: SessionId,
  Query(q): Query<QuestionQuery>,
) -> Result<Json<QuestionView>> {
  Ok(Json(logic::question_view(&state, sid.0, q.index).await?))
}

#[instrument(level = "debug", skip(state, sid), fields(session_id = %sid.0, index = body.index, score = body.score))]
pub async fn http_answer(
  State(state): State<Arc<AppState>>,
  sid: SessionId,
  Json(body): Json<AnswerIn>,
) -> Result<Json<Progress>> {
  Ok(Json(logic::record_answer(&state, sid.0, body.index, body.score).await?))
}

#[instrument(level = "info", skip(state, sid), fields(session_id = %sid.0))]
pub async fn http_submit(State(state): State<Arc<AppState>>, sid: SessionId) -> Result<Json<ResolvedResult>> {
  let resolved = logic::submit_answers(&state, sid.0, &CancelToken::never()).await?;
  info!(target: "assessment", session_id = %sid.0, percentage = resolved.result.percentage, source = ?resolved.source, "HTTP submission resolved");
  Ok(Json(resolved))
}

#[instrument(level = "debug", skip(state, sid), fields(session_id = %sid.0))]
pub async fn http_result(State(state): State<Arc<AppState>>, sid: SessionId) -> Result<Json<SubmissionResult>> {
  Ok(Json(logic::last_result(&state, sid.0).await?))
}

#[instrument(level = "info", skip(state, sid), fields(session_id = %sid.0))]
pub async fn http_jobs(State(state): State<Arc<AppState>>, sid: SessionId) -> Result<Json<Vec<Job>>> {
  Ok(Json(logic::list_jobs(&state, sid.0, &CancelToken::never()).await?))
}

#[instrument(level = "info", skip(state, sid), fields(session_id = %sid.0, job_id = %body.job_id))]
pub async fn http_select_job(
  State(state): State<Arc<AppState>>,
  sid: SessionId,
  Json(body): Json<SelectJobIn>,
) -> Result<Json<Job>> {
  Ok(Json(logic::select_job(&state, sid.0, &body.job_id, &CancelToken::never()).await?))
}

/// Multipart fields: name, email, phone, experience, education, skills, optional cvFile.
#[instrument(level = "info", skip(state, sid, form), fields(session_id = %sid.0))]
pub async fn http_application(
  State(state): State<Arc<AppState>>,
  sid: SessionId,
  form: Multipart,
) -> Result<Json<ApplicationRecord>> {
  let details = read_application_form(form).await?;
  Ok(Json(logic::submit_application(&state, sid.0, details, &CancelToken::never()).await?))
}

#[instrument(level = "info", skip(state, sid), fields(session_id = %sid.0))]
pub async fn http_report(State(state): State<Arc<AppState>>, sid: SessionId) -> Result<Json<AdofReport>> {
  Ok(Json(logic::adof_report(&state, sid.0).await?))
}

async fn read_application_form(mut form: Multipart) -> Result<ApplicantDetails> {
  let bad_form = |e: axum::extract::multipart::MultipartError| PortalError::Validation(format!("Invalid form data: {}", e));
  let mut details = ApplicantDetails::default();
  while let Some(field) = form.next_field().await.map_err(bad_form)? {
    let name = field.name().unwrap_or_default().to_string();
    if name == "cvFile" {
      let file_name = non_blank(field.file_name());
      let content_type = non_blank(field.content_type());
      let bytes = field.bytes().await.map_err(bad_form)?;
      // Browsers send an empty, nameless part when no file was chosen.
      if let Some(file_name) = file_name.filter(|_| !bytes.is_empty()) {
        details.cv = Some(CvFile { file_name, content_type, bytes: bytes.to_vec() });
      }
      continue;
    }
    let value = field.text().await.map_err(bad_form)?;
    match name.as_str() {
      "name" => details.name = value,
      "email" => details.email = value,
      "phone" => details.phone = value,
      "experience" => details.experience = value,
      "education" => details.education = value,
      "skills" => details.skills = value,
      _ => {}
    }
  }
  Ok(details)
}
