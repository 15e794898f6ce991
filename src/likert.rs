//! Five-point Likert vocabulary used as answer values on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Serialized as the exact wire phrase; deserialized leniently through `from_label`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Likert {
  #[serde(rename = "Strongly Disagree")]
  StronglyDisagree,
  #[serde(rename = "Disagree")]
  Disagree,
  #[serde(rename = "Neutral")]
  Neutral,
  #[serde(rename = "Agree")]
  Agree,
  #[serde(rename = "Strongly Agree")]
  StronglyAgree,
}

impl Likert {
  /// 1..=5 map in order; anything else is Neutral.
  pub fn from_score(score: i64) -> Self {
    match score {
      1 => Likert::StronglyDisagree,
      2 => Likert::Disagree,
      3 => Likert::Neutral,
      4 => Likert::Agree,
      5 => Likert::StronglyAgree,
      _ => Likert::Neutral,
    }
  }

  pub const ALL: [Likert; 5] = [
    Likert::StronglyDisagree,
    Likert::Disagree,
    Likert::Neutral,
    Likert::Agree,
    Likert::StronglyAgree,
  ];

  /// Match a label ignoring case and surrounding or repeated whitespace.
  pub fn from_label(s: &str) -> Option<Self> {
    let norm = s.split_whitespace().collect::<Vec<_>>().join(" ");
    Likert::ALL.into_iter().find(|l| l.label().eq_ignore_ascii_case(&norm))
  }

  pub fn label(self) -> &'static str {
    match self {
      Likert::StronglyDisagree => "Strongly Disagree",
      Likert::Disagree => "Disagree",
      Likert::Neutral => "Neutral",
      Likert::Agree => "Agree",
      Likert::StronglyAgree => "Strongly Agree",
    }
  }
}

impl TryFrom<String> for Likert {
  type Error = String;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    Likert::from_label(&s).ok_or_else(|| {
      format!("unknown answer '{}'; expected one of: {}", s.trim(), Likert::ALL.map(Likert::label).join(", "))
    })
  }
}

impl fmt::Display for Likert {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// Zero-based question index to the one-based key the server expects.
pub fn answer_key(index: usize) -> String {
  (index + 1).to_string()
}
