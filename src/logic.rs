//! Orchestration shared by the HTTP and WebSocket handlers.
//!
//! Each operation corresponds to one user action:
//!   - sign up / sign in / sign out
//!   - acquire a test (generate, then prefer a non-empty re-fetch)
//!   - navigate questions and record answers
//!   - submit answers and resolve the scored result (canonical lookup, else the raw submission)
//!   - ADOF: list and select a job, submit the application, build the report
//!
//! Remote-backed actions claim the session's flow lock first, and session state is only
//! written after every remote step succeeded, so a failure leaves the session as it was.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::answers::Progress;
use crate::api::AssessmentApi;
use crate::cancel::CancelToken;
use crate::domain::{ApplicantDetails, Credentials, GeneratedTest, Job, Question, Role, SignIn, SubmissionResult};
use crate::error::{PortalError, Result};
use crate::ids::resolve_result_id;
use crate::report::{build_report, AdofReport};
use crate::session::{ActiveTest, ApplicationRecord, SessionContext};
use crate::state::AppState;

/// One question as shown while navigating, with the prior selection if any.
#[derive(Clone, Debug, Serialize)]
pub struct QuestionView {
  pub index: usize,
  pub question: Question,
  pub selected: Option<i64>,
  pub progress: Progress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
  /// Fetched again by result id.
  Canonical,
  /// Built from the submission response because the lookup was impossible or failed.
  SubmissionFallback,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedResult {
  pub result: SubmissionResult,
  pub source: ResultSource,
  /// The submission response, kept when it is what the result was built from.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub raw: Option<Value>,
}

// -------- account --------

#[instrument(level = "info", skip(state, creds, cancel), fields(role = %creds.role))]
pub async fn sign_up(state: &AppState, creds: &Credentials, cancel: &CancelToken) -> Result<String> {
  creds.validate()?;
  let msg = state.api.signup(creds, cancel).await?;
  info!(target: "assessment", role = %creds.role, "Account created");
  Ok(msg)
}

#[instrument(level = "info", skip(state, creds, cancel))]
pub async fn sign_in(state: &AppState, creds: &SignIn, cancel: &CancelToken) -> Result<SessionContext> {
  creds.validate()?;
  let user = state.api.signin(creds, cancel).await?;
  let ctx = state.sessions.create(user).await;
  info!(target: "assessment", session_id = %ctx.id, user_id = %ctx.user.id, role = %ctx.user.role, "Signed in");
  Ok(ctx)
}

#[instrument(level = "info", skip(state))]
pub async fn sign_out(state: &AppState, session_id: Uuid) -> Result<()> {
  if state.sessions.destroy(session_id).await {
    Ok(())
  } else {
    Err(PortalError::Unauthorized)
  }
}

// -------- test flow --------

/// Generate a test, then try the stored copy; a non-empty stored copy wins.
#[instrument(level = "info", skip(state, cancel), fields(%session_id))]
pub async fn acquire_test(state: &AppState, session_id: Uuid, cancel: &CancelToken) -> Result<GeneratedTest> {
  let _flow = state.sessions.begin(session_id).await?;
  let ctx = state.sessions.snapshot(session_id).await?;
  let user_id = ctx.user.id.as_str();

  let generated = state.api.generate_test(user_id, cancel).await?;
  let test = match state.api.fetch_mcqs(user_id, cancel).await {
    Ok(fetched) if !fetched.questions.is_empty() => {
      info!(target: "assessment", %user_id, questions = fetched.questions.len(), document_id = ?fetched.document_id, "Using stored copy of generated test");
      generated.merge_fetched(fetched)
    }
    Ok(_) => {
      warn!(target: "assessment", %user_id, "Stored copy has no questions; keeping generated test");
      generated
    }
    Err(PortalError::Cancelled) => return Err(PortalError::Cancelled),
    Err(e) => {
      warn!(target: "assessment", %user_id, error = %e, "Fetching stored test failed; keeping generated test");
      generated
    }
  };

  if test.questions.is_empty() {
    return Err(PortalError::Malformed("The server returned a test without questions; please try again".into()));
  }
  if test.document_id.is_none() {
    warn!(target: "assessment", %user_id, "Test has no identifier; submission will require regeneration");
  }

  let active = ActiveTest::new(test.clone());
  state
    .sessions
    .update(session_id, |c| {
      c.test = Some(active);
      c.scored_test = None;
      c.last_result = None;
    })
    .await?;
  Ok(test)
}

#[instrument(level = "debug", skip(state), fields(%session_id, index))]
pub async fn question_view(state: &AppState, session_id: Uuid, index: usize) -> Result<QuestionView> {
  let ctx = state.sessions.snapshot(session_id).await?;
  let active = ctx.test.ok_or_else(no_test)?;
  let question = active.test.questions.get(index).cloned().ok_or_else(|| {
    PortalError::Validation(format!(
      "Question {} does not exist; this test has {} questions",
      index + 1,
      active.test.questions.len()
    ))
  })?;
  Ok(QuestionView { index, question, selected: active.sheet.selection(index), progress: active.sheet.progress() })
}

#[instrument(level = "debug", skip(state), fields(%session_id, index, score))]
pub async fn record_answer(state: &AppState, session_id: Uuid, index: usize, score: i64) -> Result<Progress> {
  let _flow = state.sessions.begin(session_id).await?;
  state
    .sessions
    .update(session_id, |c| match c.test.as_mut() {
      Some(active) => active.sheet.record(index, score),
      None => Err(no_test()),
    })
    .await?
}

/// Submit the completed sheet and resolve the scored result.
#[instrument(level = "info", skip(state, cancel), fields(%session_id))]
pub async fn submit_answers(state: &AppState, session_id: Uuid, cancel: &CancelToken) -> Result<ResolvedResult> {
  let _flow = state.sessions.begin(session_id).await?;
  let ctx = state.sessions.snapshot(session_id).await?;
  let active = ctx.test.ok_or_else(no_test)?;

  let mcq_id = active.test.document_id.clone().ok_or_else(|| {
    PortalError::MissingIdentifier("This test has no identifier; please generate a new test".into())
  })?;
  let answers = active.sheet.to_answer_set(&ctx.user.id, mcq_id.as_str())?;
  answers.validate(active.test.questions.len())?;

  let raw = state.api.submit_answers(&answers, cancel).await?;
  info!(target: "assessment", user_id = %ctx.user.id, %mcq_id, answers = answers.answers.len(), "Answers submitted");

  let resolved = resolve_result(&state.api, raw, cancel).await;
  info!(
    target: "assessment",
    result_id = ?resolved.result.result_id,
    percentage = resolved.result.percentage,
    source = ?resolved.source,
    "Result resolved"
  );

  let result = resolved.result.clone();
  state
    .sessions
    .update(session_id, |c| {
      c.last_result = Some(result);
      c.scored_test = Some(active.test);
      c.test = None;
    })
    .await?;
  Ok(resolved)
}

/// Prefer the canonical result by id; otherwise use the submission response.
/// Never fails: the submission already succeeded.
#[instrument(level = "info", skip(api, raw, cancel))]
pub async fn resolve_result(api: &AssessmentApi, raw: Value, cancel: &CancelToken) -> ResolvedResult {
  if let Some(result_id) = resolve_result_id(&raw) {
    match api.fetch_result(&result_id, cancel).await {
      Ok(mut result) => {
        if result.result_id.is_none() {
          result.result_id = Some(result_id);
        }
        return ResolvedResult { result, source: ResultSource::Canonical, raw: None };
      }
      Err(e) => {
        warn!(target: "assessment", %result_id, error = %e, "Result lookup failed; using submission response");
      }
    }
  } else {
    warn!(target: "assessment", "Submission response has no result_id; using it directly");
  }

  let result = SubmissionResult::from_value(&raw).unwrap_or_else(|e| {
    warn!(target: "assessment", error = %e, "Submission response is not a result record");
    SubmissionResult::default()
  });
  ResolvedResult { result, source: ResultSource::SubmissionFallback, raw: Some(raw) }
}

#[instrument(level = "debug", skip(state), fields(%session_id))]
pub async fn last_result(state: &AppState, session_id: Uuid) -> Result<SubmissionResult> {
  state
    .sessions
    .snapshot(session_id)
    .await?
    .last_result
    .ok_or_else(|| PortalError::Validation("No result yet; submit a test first".into()))
}

// -------- ADOF flow --------

#[instrument(level = "info", skip(state, cancel), fields(%session_id))]
pub async fn list_jobs(state: &AppState, session_id: Uuid, cancel: &CancelToken) -> Result<Vec<Job>> {
  let _flow = state.sessions.begin(session_id).await?;
  state.api.list_jobs(cancel).await
}

#[instrument(level = "info", skip(state, cancel), fields(%session_id, %job_id))]
pub async fn select_job(state: &AppState, session_id: Uuid, job_id: &str, cancel: &CancelToken) -> Result<Job> {
  let _flow = state.sessions.begin(session_id).await?;
  require_adof(&state.sessions.snapshot(session_id).await?)?;

  let job = state
    .api
    .list_jobs(cancel)
    .await?
    .into_iter()
    .find(|j| j.id == job_id.trim())
    .ok_or_else(|| PortalError::Validation(format!("Job '{}' is not available", job_id)))?;

  let chosen = job.clone();
  state
    .sessions
    .update(session_id, |c| {
      if c.adof.job.as_ref().map(|j| &j.id) != Some(&chosen.id) {
        c.adof.application = None;
      }
      c.adof.job = Some(chosen);
    })
    .await?;
  info!(target: "assessment", job_id = %job.id, title = %job.title, "Job selected");
  Ok(job)
}

#[instrument(level = "info", skip(state, details, cancel), fields(%session_id, has_cv = details.cv.is_some()))]
pub async fn submit_application(
  state: &AppState,
  session_id: Uuid,
  details: ApplicantDetails,
  cancel: &CancelToken,
) -> Result<ApplicationRecord> {
  let _flow = state.sessions.begin(session_id).await?;
  let ctx = state.sessions.snapshot(session_id).await?;
  require_adof(&ctx)?;
  let job = ctx
    .adof
    .job
    .ok_or_else(|| PortalError::Validation("Select a job before submitting your application".into()))?;

  let submission = details.for_job(&job);
  submission.validate()?;
  let receipt = state.api.submit_user_data(&submission, cancel).await?;
  if !receipt.success {
    let message = if receipt.message.is_empty() { "The application was not accepted".to_string() } else { receipt.message };
    warn!(target: "assessment", job_id = %job.id, %message, "Application refused by the server");
    // The server answered 2xx but refused the application.
    return Err(PortalError::Remote { status: 200, message });
  }

  let record = ApplicationRecord {
    job_id: job.id.clone(),
    cv_file: submission.cv.as_ref().map(|cv| cv.file_name.clone()),
    receipt,
    submitted_at: chrono::Utc::now(),
  };
  let stored = record.clone();
  state.sessions.update(session_id, |c| c.adof.application = Some(stored)).await?;
  info!(target: "assessment", job_id = %job.id, "Application submitted");
  Ok(record)
}

#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn adof_report(state: &AppState, session_id: Uuid) -> Result<AdofReport> {
  let ctx = state.sessions.snapshot(session_id).await?;
  require_adof(&ctx)?;
  build_report(&ctx)
}

fn require_adof(ctx: &SessionContext) -> Result<()> {
  if ctx.user.role == Role::Adof {
    Ok(())
  } else {
    Err(PortalError::Validation("This step is only available to ADOF applicants".into()))
  }
}

fn no_test() -> PortalError {
  PortalError::Validation("No test in progress; generate a test first".into())
}
