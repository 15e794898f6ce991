//! Identifier resolution for remote documents.
//!
//! The assessment server is inconsistent about which field carries an id, so
//! every response is inspected once, at ingestion, against an explicit priority list.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields that may carry the MCQ document id, highest priority first.
pub const DOCUMENT_ID_PRIORITY: [&str; 5] = ["mcqs_id", "document_id", "documentId", "id", "_id"];

/// Fields that may carry a user id in sign-in responses.
pub const USER_ID_PRIORITY: [&str; 3] = ["id", "_id", "user_id"];

/// Normalized id of a generated MCQ document on the remote server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteDocumentId(String);

impl RemoteDocumentId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RemoteDocumentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Render an id-like JSON value as text: non-blank strings, numbers, or `{"$oid": ".."}`.
pub fn id_text(v: &Value) -> Option<String> {
  match v {
    Value::String(s) => {
      let s = s.trim();
      if s.is_empty() { None } else { Some(s.to_string()) }
    }
    Value::Number(n) => Some(n.to_string()),
    Value::Object(map) => map.get("$oid").and_then(id_text),
    _ => None,
  }
}

/// First non-empty value among `fields`, in order.
pub fn first_id(v: &Value, fields: &[&str]) -> Option<String> {
  fields.iter().find_map(|f| v.get(*f).and_then(id_text))
}

pub fn resolve_document_id(v: &Value) -> Option<RemoteDocumentId> {
  first_id(v, &DOCUMENT_ID_PRIORITY).map(RemoteDocumentId)
}

/// `result_id` at the top level, then under `data`.
pub fn resolve_result_id(v: &Value) -> Option<String> {
  v.get("result_id")
    .and_then(id_text)
    .or_else(|| v.get("data").and_then(|d| d.get("result_id")).and_then(id_text))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn document_id_used_when_mcqs_id_missing() {
    let v = json!({ "document_id": "doc-7", "id": "other", "questions": [] });
    assert_eq!(resolve_document_id(&v).unwrap().as_str(), "doc-7");
  }

  #[test]
  fn priority_order_is_respected() {
    let v = json!({ "_id": "e", "id": "d", "documentId": "c", "document_id": "b", "mcqs_id": "a" });
    assert_eq!(resolve_document_id(&v).unwrap().as_str(), "a");
    let v = json!({ "_id": "e", "documentId": "c" });
    assert_eq!(resolve_document_id(&v).unwrap().as_str(), "c");
  }

  #[test]
  fn blank_and_null_values_are_skipped() {
    let v = json!({ "mcqs_id": "", "document_id": null, "documentId": "   ", "id": 42 });
    assert_eq!(resolve_document_id(&v).unwrap().as_str(), "42");
  }

  #[test]
  fn mongo_object_id_is_unwrapped() {
    let v = json!({ "_id": { "$oid": "65f0c0ffee" } });
    assert_eq!(resolve_document_id(&v).unwrap().to_string(), "65f0c0ffee");
  }

  #[test]
  fn no_identifier_at_all() {
    assert!(resolve_document_id(&json!({ "message": "ok", "questions": [] })).is_none());
    assert!(resolve_document_id(&json!([1, 2])).is_none());
  }

  #[test]
  fn result_id_top_level_then_nested() {
    assert_eq!(resolve_result_id(&json!({ "result_id": "r1", "data": { "result_id": "r2" } })).as_deref(), Some("r1"));
    assert_eq!(resolve_result_id(&json!({ "data": { "result_id": "r2" } })).as_deref(), Some("r2"));
    assert!(resolve_result_id(&json!({ "data": { "percentage": 40 } })).is_none());
  }
}
