//! Answer capture while the user walks through a test one question at a time.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::AnswerSet;
use crate::error::{PortalError, Result};
use crate::likert::{answer_key, Likert};

/// Zero-based question index -> selected option score.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AnswerSheet {
  question_count: usize,
  selections: BTreeMap<usize, i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Progress {
  pub answered: usize,
  pub total: usize,
  pub complete: bool,
}

impl AnswerSheet {
  pub fn new(question_count: usize) -> Self {
    Self { question_count, selections: BTreeMap::new() }
  }

  /// Record (or overwrite) the selection for one question.
  pub fn record(&mut self, index: usize, score: i64) -> Result<Progress> {
    if index >= self.question_count {
      return Err(PortalError::Validation(format!(
        "Question {} does not exist; this test has {} questions",
        index + 1,
        self.question_count
      )));
    }
    self.selections.insert(index, score);
    Ok(self.progress())
  }

  pub fn selection(&self, index: usize) -> Option<i64> {
    self.selections.get(&index).copied()
  }

  pub fn progress(&self) -> Progress {
    Progress {
      answered: self.selections.len(),
      total: self.question_count,
      complete: self.is_complete(),
    }
  }

  pub fn is_complete(&self) -> bool {
    self.question_count > 0 && self.selections.len() == self.question_count
  }

  /// Translate into the wire answer set; incomplete sheets are rejected locally.
  pub fn to_answer_set(&self, user_id: &str, mcq_id: &str) -> Result<AnswerSet> {
    if !self.is_complete() {
      let missing = self.question_count.saturating_sub(self.selections.len());
      return Err(PortalError::Validation(format!(
        "Please answer all questions before submitting ({} unanswered)",
        missing.max(1)
      )));
    }
    let answers = self
      .selections
      .iter()
      .map(|(&index, &score)| (answer_key(index), Likert::from_score(score)))
      .collect();
    Ok(AnswerSet { user_id: user_id.to_string(), mcq_id: mcq_id.to_string(), answers })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn revisiting_keeps_and_overwrites_selection() {
    let mut sheet = AnswerSheet::new(3);
    sheet.record(0, 4).unwrap();
    sheet.record(1, 2).unwrap();
    assert_eq!(sheet.selection(0), Some(4));
    sheet.record(0, 5).unwrap();
    assert_eq!(sheet.selection(0), Some(5));
    assert_eq!(sheet.selection(1), Some(2));
    assert_eq!(sheet.progress(), Progress { answered: 2, total: 3, complete: false });
  }

  #[test]
  fn out_of_range_index_is_rejected() {
    let mut sheet = AnswerSheet::new(2);
    assert!(matches!(sheet.record(2, 3), Err(PortalError::Validation(_))));
    assert_eq!(sheet.progress().answered, 0);
  }

  #[test]
  fn incomplete_sheet_cannot_be_submitted() {
    let mut sheet = AnswerSheet::new(3);
    sheet.record(0, 1).unwrap();
    sheet.record(2, 1).unwrap();
    let err = sheet.to_answer_set("u1", "m1").unwrap_err();
    assert!(err.to_string().contains("1 unanswered"));
  }

  #[test]
  fn empty_test_is_never_complete() {
    let sheet = AnswerSheet::new(0);
    assert!(!sheet.is_complete());
    assert!(sheet.to_answer_set("u", "m").is_err());
  }

  #[test]
  fn complete_sheet_translates_keys_and_labels() {
    let mut sheet = AnswerSheet::new(2);
    sheet.record(1, 5).unwrap();
    sheet.record(0, 4).unwrap();
    let set = sheet.to_answer_set("u1", "m1").unwrap();
    let json = serde_json::to_value(&set).unwrap();
    assert_eq!(json["answers"]["1"], "Agree");
    assert_eq!(json["answers"]["2"], "Strongly Agree");
    assert!(set.validate(2).is_ok());
  }

  #[test]
  fn unknown_scores_become_neutral() {
    let mut sheet = AnswerSheet::new(1);
    sheet.record(0, 99).unwrap();
    let set = sheet.to_answer_set("u1", "m1").unwrap();
    assert_eq!(set.answers["1"], Likert::Neutral);
  }
}
