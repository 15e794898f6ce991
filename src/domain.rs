//! Domain models: roles, users, generated tests, answers, results, jobs and CV submissions.
//!
//! Remote responses arrive as loosely shaped JSON; the `from_value` constructors here
//! normalise them once so the rest of the crate works with plain typed records.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{PortalError, Result};
use crate::ids::{first_id, id_text, resolve_document_id, resolve_result_id, RemoteDocumentId, USER_ID_PRIORITY};
use crate::likert::{answer_key, Likert};

/// Which portal flow a user walks through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
  #[serde(rename = "TVET")]
  Tvet,
  #[serde(rename = "ADOF")]
  Adof,
}

impl Role {
  pub fn as_str(self) -> &'static str {
    match self {
      Role::Tvet => "TVET",
      Role::Adof => "ADOF",
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Role {
  type Err = PortalError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_uppercase().as_str() {
      "TVET" => Ok(Role::Tvet),
      "ADOF" => Ok(Role::Adof),
      other => Err(PortalError::Validation(format!("Unknown role '{}'; expected TVET or ADOF", other))),
    }
  }
}

/// Sign-up payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credentials {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub email: String,
  pub password: String,
  pub role: Role,
}

impl Credentials {
  pub fn validate(&self) -> Result<()> {
    validate_email(&self.email)?;
    if self.password.is_empty() {
      return Err(PortalError::Validation("Password is required".into()));
    }
    if let Some(name) = &self.name {
      if name.trim().is_empty() {
        return Err(PortalError::Validation("Name must not be blank".into()));
      }
    }
    Ok(())
  }
}

/// Sign-in payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignIn {
  pub email: String,
  pub password: String,
}

impl SignIn {
  pub fn validate(&self) -> Result<()> {
    validate_email(&self.email)?;
    if self.password.is_empty() {
      return Err(PortalError::Validation("Password is required".into()));
    }
    Ok(())
  }
}

fn validate_email(email: &str) -> Result<()> {
  let email = email.trim();
  if email.is_empty() {
    return Err(PortalError::Validation("Email is required".into()));
  }
  if !email.contains('@') {
    return Err(PortalError::Validation(format!("'{}' is not a valid email address", email)));
  }
  Ok(())
}

/// Signed-in user as reported by the remote server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  pub role: Role,
}

impl User {
  /// Accepts `{user: {..}}` or a flat `{id, name, role}` body.
  pub fn from_signin(v: &Value) -> Result<Self> {
    let body = match v.get("user") {
      Some(u) if u.is_object() => u,
      _ => v,
    };
    if !body.is_object() {
      return Err(PortalError::Malformed("sign-in response is not a JSON object".into()));
    }
    let id = first_id(body, &USER_ID_PRIORITY)
      .ok_or_else(|| PortalError::MissingIdentifier("Sign-in response did not include a user id".into()))?;
    let name = str_field(body, "name").unwrap_or_default();
    let email = str_field(body, "email");
    let role = match str_field(body, "role") {
      Some(r) => r.parse()?,
      None => {
        warn!(target: "assessment", user_id = %id, "Sign-in response has no role; assuming TVET");
        Role::Tvet
      }
    };
    Ok(Self { id, name, email, role })
  }
}

/// One answer option; `score` is what gets recorded when it is picked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
  #[serde(deserialize_with = "lenient_i64")]
  pub score: i64,
  pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Question {
  pub question: String,
  #[serde(default, deserialize_with = "lenient_opt_u32", skip_serializing_if = "Option::is_none")]
  pub question_no: Option<u32>,
  #[serde(rename = "trait", default)]
  pub trait_name: String,
  #[serde(default)]
  pub options: Vec<QuestionOption>,
}

/// A generated MCQ set, with its id already resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratedTest {
  pub document_id: Option<RemoteDocumentId>,
  pub message: Option<String>,
  pub questions: Vec<Question>,
}

impl GeneratedTest {
  pub fn from_value(v: &Value) -> Result<Self> {
    if !v.is_object() {
      return Err(PortalError::Malformed("test payload is not a JSON object".into()));
    }
    let questions = match v.get("questions") {
      None | Some(Value::Null) => Vec::new(),
      Some(q) => serde_json::from_value::<Vec<Question>>(q.clone())
        .map_err(|e| PortalError::Malformed(format!("invalid questions list: {}", e)))?,
    };
    Ok(Self {
      document_id: resolve_document_id(v),
      message: str_field(v, "message"),
      questions,
    })
  }

  /// Overlay a re-fetched copy onto the generated one.
  ///
  /// The fetched copy only wins when it actually carries questions; then its
  /// present fields replace ours and absent ones keep the generated values.
  pub fn merge_fetched(self, fetched: GeneratedTest) -> GeneratedTest {
    if fetched.questions.is_empty() {
      return self;
    }
    GeneratedTest {
      document_id: fetched.document_id.or(self.document_id),
      message: fetched.message.or(self.message),
      questions: fetched.questions,
    }
  }

  /// Distinct traits referenced by the questions, in first-seen order.
  pub fn traits(&self) -> Vec<String> {
    let mut seen = BTreeSet::new();
    self.questions
      .iter()
      .filter(|q| !q.trait_name.is_empty())
      .filter(|q| seen.insert(q.trait_name.clone()))
      .map(|q| q.trait_name.clone())
      .collect()
  }
}

/// The body sent to `/submit_answers`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerSet {
  pub user_id: String,
  pub mcq_id: String,
  pub answers: BTreeMap<String, Likert>,
}

impl AnswerSet {
  /// Exactly one entry per question, keyed "1".."N".
  pub fn validate(&self, question_count: usize) -> Result<()> {
    if self.user_id.trim().is_empty() {
      return Err(PortalError::Validation("Answer set has no user id".into()));
    }
    if self.mcq_id.trim().is_empty() {
      return Err(PortalError::MissingIdentifier("Test id is missing; please regenerate the test".into()));
    }
    if self.answers.len() != question_count {
      return Err(PortalError::Validation(format!(
        "Expected {} answers but got {}",
        question_count,
        self.answers.len()
      )));
    }
    for i in 0..question_count {
      let key = answer_key(i);
      if !self.answers.contains_key(&key) {
        return Err(PortalError::Validation(format!("Missing answer for question {}", key)));
      }
    }
    Ok(())
  }
}

/// Scored result of a submission.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
  pub result_id: Option<String>,
  pub user_id: Option<String>,
  pub mcq_id: Option<String>,
  pub total_score: Option<f64>,
  pub max_score: Option<f64>,
  pub percentage: f64,
  pub analysis: BTreeMap<String, String>,
}

impl SubmissionResult {
  /// Accepts `{data: {..}}` or the flat record.
  pub fn from_value(v: &Value) -> Result<Self> {
    let body = match v.get("data") {
      Some(d) if d.is_object() => d,
      _ => v,
    };
    if !body.is_object() {
      return Err(PortalError::Malformed("result payload is not a JSON object".into()));
    }
    let total_score = body.get("total_score").and_then(lenient_f64);
    let max_score = body.get("max_score").and_then(lenient_f64);
    let percentage = match body.get("percentage").and_then(lenient_f64) {
      Some(p) => p,
      None => match (total_score, max_score) {
        (Some(t), Some(m)) if m > 0.0 => t / m * 100.0,
        _ => 0.0,
      },
    };
    let analysis = match body.get("analysis") {
      Some(Value::Object(map)) => map
        .iter()
        .filter_map(|(k, v)| analysis_label(v).map(|label| (k.clone(), label)))
        .collect(),
      _ => BTreeMap::new(),
    };
    Ok(Self {
      result_id: resolve_result_id(v),
      user_id: body.get("user_id").and_then(id_text),
      mcq_id: body.get("mcq_id").and_then(id_text),
      total_score,
      max_score,
      percentage: percentage.clamp(0.0, 100.0),
      analysis,
    })
  }
}

fn analysis_label(v: &Value) -> Option<String> {
  match v {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    Value::Object(o) => o
      .get("label")
      .or_else(|| o.get("level"))
      .and_then(Value::as_str)
      .map(str::to_string),
    _ => None,
  }
}

/// An open position from the `/jobs` listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub id: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub company: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub requirements: Vec<String>,
  /// Listing fields without a dedicated slot (salary, deadline, ...), passed through as-is.
  #[serde(flatten, default)]
  pub extra: Map<String, Value>,
}

const JOB_ID_FIELDS: [&str; 3] = ["id", "_id", "jobId"];
const JOB_KNOWN_FIELDS: [&str; 5] = ["title", "company", "location", "description", "requirements"];

impl Job {
  pub fn from_value(v: &Value) -> Result<Self> {
    let id = first_id(v, &JOB_ID_FIELDS)
      .ok_or_else(|| PortalError::Malformed("job entry without an id".into()))?;
    let title = str_field(v, "title").unwrap_or_else(|| "Untitled position".into());
    let requirements = match v.get("requirements") {
      Some(Value::Array(items)) => items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect(),
      Some(Value::String(s)) => s
        .split(['\n', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect(),
      _ => Vec::new(),
    };
    Ok(Self {
      id,
      title,
      company: str_field(v, "company"),
      location: str_field(v, "location"),
      description: str_field(v, "description"),
      requirements,
      extra: v
        .as_object()
        .map(|o| {
          o.iter()
            .filter(|(k, _)| !JOB_ID_FIELDS.contains(&k.as_str()) && !JOB_KNOWN_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
        })
        .unwrap_or_default(),
    })
  }

  /// Accepts a bare array or one wrapped in `jobs`/`data`. Entries that cannot be
  /// selected (no id) are skipped rather than failing the whole listing.
  pub fn list_from_value(v: &Value) -> Result<Vec<Self>> {
    let items = v
      .as_array()
      .or_else(|| v.get("jobs").and_then(Value::as_array))
      .or_else(|| v.get("data").and_then(Value::as_array))
      .ok_or_else(|| PortalError::Malformed("job listing is not an array".into()))?;
    let mut jobs = Vec::with_capacity(items.len());
    for (pos, item) in items.iter().enumerate() {
      match Job::from_value(item) {
        Ok(job) => jobs.push(job),
        Err(e) => {
          warn!(target: "assessment", position = pos, title = ?str_field(item, "title"), error = %e, "Skipping job entry");
        }
      }
    }
    Ok(jobs)
  }
}

pub const MAX_CV_BYTES: usize = 10 * 1024 * 1024;
const CV_EXTENSIONS: [&str; 3] = ["pdf", "doc", "docx"];

#[derive(Clone, Debug, PartialEq)]
pub struct CvFile {
  pub file_name: String,
  pub content_type: Option<String>,
  pub bytes: Vec<u8>,
}

/// What the applicant fills in; the job fields come from the session's selected job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplicantDetails {
  pub name: String,
  pub email: String,
  pub phone: String,
  pub experience: String,
  pub education: String,
  pub skills: String,
  pub cv: Option<CvFile>,
}

impl ApplicantDetails {
  pub fn for_job(self, job: &Job) -> CvSubmission {
    CvSubmission {
      name: self.name,
      email: self.email,
      phone: self.phone,
      experience: self.experience,
      education: self.education,
      skills: self.skills,
      job_id: job.id.clone(),
      job_title: job.title.clone(),
      cv: self.cv,
    }
  }
}

/// Applicant details for the ADOF flow (`/submit-user-data`).
#[derive(Clone, Debug, PartialEq)]
pub struct CvSubmission {
  pub name: String,
  pub email: String,
  pub phone: String,
  pub experience: String,
  pub education: String,
  pub skills: String,
  pub job_id: String,
  pub job_title: String,
  pub cv: Option<CvFile>,
}

impl CvSubmission {
  pub fn validate(&self) -> Result<()> {
    let required = [
      ("name", &self.name),
      ("phone", &self.phone),
      ("experience", &self.experience),
      ("education", &self.education),
      ("skills", &self.skills),
      ("job", &self.job_id),
    ];
    let missing: Vec<&str> = required
      .iter()
      .filter(|(_, v)| v.trim().is_empty())
      .map(|(k, _)| *k)
      .collect();
    if !missing.is_empty() {
      return Err(PortalError::Validation(format!("Missing required fields: {}", missing.join(", "))));
    }
    validate_email(&self.email)?;
    if let Some(cv) = &self.cv {
      if cv.bytes.is_empty() {
        return Err(PortalError::Validation("CV file is empty".into()));
      }
      if cv.bytes.len() > MAX_CV_BYTES {
        return Err(PortalError::Validation("CV file is larger than 10 MB".into()));
      }
      let ext = cv.file_name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
      if !ext.as_deref().is_some_and(|e| CV_EXTENSIONS.contains(&e)) {
        return Err(PortalError::Validation("CV must be a PDF or Word document".into()));
      }
    }
    Ok(())
  }
}

/// Server acknowledgement of a CV submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CvReceipt {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub message: String,
}

// -------- lenient field helpers --------

fn str_field(v: &Value, key: &str) -> Option<String> {
  v.get(key)
    .and_then(Value::as_str)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

fn lenient_f64(v: &Value) -> Option<f64> {
  match v {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
    _ => None,
  }
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
  let v = Value::deserialize(d)?;
  let score = match &v {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  };
  score.ok_or_else(|| serde::de::Error::custom(format!("expected integer score, got {}", v)))
}

fn lenient_opt_u32<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u32>, D::Error> {
  let v = Option::<Value>::deserialize(d)?;
  Ok(match v {
    Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
    Some(Value::String(s)) => s.trim().parse().ok(),
    _ => None,
  })
}
