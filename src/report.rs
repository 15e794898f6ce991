//! ADOF report: candidate, chosen job, application receipt and scored traits as JSON.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Job, Role, SubmissionResult};
use crate::error::{PortalError, Result};
use crate::session::{ApplicationRecord, SessionContext};

const NOT_ASSESSED: &str = "Not assessed";

#[derive(Clone, Debug, Serialize)]
pub struct AdofReport {
  pub generated_at: DateTime<Utc>,
  pub candidate: Candidate,
  pub job: Option<Job>,
  pub application: Option<ApplicationRecord>,
  pub result: SubmissionResult,
  pub traits: Vec<TraitLine>,
  pub summary: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct Candidate {
  pub user_id: String,
  pub name: String,
  pub email: Option<String>,
  pub role: Role,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraitLine {
  #[serde(rename = "trait")]
  pub trait_name: String,
  pub label: String,
  /// How many questions of the scored test measured this trait.
  pub questions: usize,
}

pub fn build_report(ctx: &SessionContext) -> Result<AdofReport> {
  let result = ctx
    .last_result
    .clone()
    .ok_or_else(|| PortalError::Validation("Complete the test before requesting a report".into()))?;

  let questions_for = |t: &str| {
    ctx.scored_test
      .as_ref()
      .map(|test| test.questions.iter().filter(|q| q.trait_name == t).count())
      .unwrap_or(0)
  };

  let mut traits: Vec<TraitLine> = result
    .analysis
    .iter()
    .map(|(t, label)| TraitLine { trait_name: t.clone(), label: label.clone(), questions: questions_for(t) })
    .collect();
  if let Some(test) = &ctx.scored_test {
    for t in test.traits() {
      if !result.analysis.contains_key(&t) {
        traits.push(TraitLine { questions: questions_for(&t), trait_name: t, label: NOT_ASSESSED.into() });
      }
    }
  }

  let name = if ctx.user.name.is_empty() { "The candidate" } else { ctx.user.name.as_str() };
  let mut summary = format!("{} scored {:.1}%", name, result.percentage);
  if let (Some(total), Some(max)) = (result.total_score, result.max_score) {
    summary.push_str(&format!(" ({} of {} points)", total, max));
  }
  if let Some(job) = &ctx.adof.job {
    summary.push_str(&format!(" for the {} position", job.title));
  }
  summary.push('.');

  Ok(AdofReport {
    generated_at: Utc::now(),
    candidate: Candidate {
      user_id: ctx.user.id.clone(),
      name: ctx.user.name.clone(),
      email: ctx.user.email.clone(),
      role: ctx.user.role,
    },
    job: ctx.adof.job.clone(),
    application: ctx.adof.application.clone(),
    result,
    traits,
    summary,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{GeneratedTest, User};
  use crate::session::AdofProgress;
  use serde_json::json;
  use uuid::Uuid;

  fn ctx() -> SessionContext {
    SessionContext {
      id: Uuid::new_v4(),
      user: User { id: "u1".into(), name: "Ama".into(), email: None, role: Role::Adof },
      started_at: Utc::now(),
      test: None,
      scored_test: None,
      last_result: None,
      adof: AdofProgress::default(),
    }
  }

  #[test]
  fn report_requires_a_result() {
    assert!(matches!(build_report(&ctx()), Err(PortalError::Validation(_))));
  }

  #[test]
  fn traits_cover_analysis_and_unscored_questions() {
    let mut c = ctx();
    c.scored_test = Some(
      GeneratedTest::from_value(&json!({ "questions": [
        { "question": "a", "trait": "Grit", "options": [] },
        { "question": "b", "trait": "Grit", "options": [] },
        { "question": "c", "trait": "Curiosity", "options": [] }
      ]}))
      .unwrap(),
    );
    c.last_result = Some(
      SubmissionResult::from_value(&json!({ "percentage": 72.5, "total_score": 29, "max_score": 40, "analysis": { "Grit": "High" } }))
        .unwrap(),
    );
    c.adof.job = Some(Job {
      id: "j1".into(),
      title: "Electrician".into(),
      company: None,
      location: None,
      description: None,
      requirements: vec![],
      extra: Default::default(),
    });

    let r = build_report(&c).unwrap();
    assert_eq!(
      r.traits,
      vec![
        TraitLine { trait_name: "Grit".into(), label: "High".into(), questions: 2 },
        TraitLine { trait_name: "Curiosity".into(), label: NOT_ASSESSED.into(), questions: 1 },
      ]
    );
    assert_eq!(r.summary, "Ama scored 72.5% (29 of 40 points) for the Electrician position.");
  }
}
