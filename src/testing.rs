//! In-process stand-in for the remote assessment server, used by tests.
//!
//! Each route answers a canned response (happy path by default), counts hits,
//! records the last request body, and can be told to fail or stall.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
  extract::{Multipart, Path, Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::api::AssessmentApi;
use crate::config::RemoteConfig;

#[derive(Clone)]
enum Body {
  Json(Value),
  Text(String),
}

#[derive(Default)]
struct FakeState {
  responses: HashMap<&'static str, (StatusCode, Body)>,
  hits: HashMap<&'static str, u32>,
  fail_first: HashMap<&'static str, u32>,
  delays: HashMap<&'static str, Duration>,
  last_body: HashMap<&'static str, Value>,
  last_path_user: Option<String>,
  multipart_fields: Vec<(String, String)>,
}

type Shared = Arc<Mutex<FakeState>>;

pub struct FakeRemote {
  pub base_url: String,
  state: Shared,
}

pub fn question(no: u32, trait_name: &str) -> Value {
  json!({
    "question": format!("Statement {}", no),
    "question_no": no,
    "trait": trait_name,
    "options": [
      { "score": 1, "text": "Strongly Disagree" },
      { "score": 2, "text": "Disagree" },
      { "score": 3, "text": "Neutral" },
      { "score": 4, "text": "Agree" },
      { "score": 5, "text": "Strongly Agree" }
    ]
  })
}

fn result_body() -> Value {
  json!({ "data": {
    "result_id": "r1",
    "user_id": "u1",
    "mcq_id": "m1",
    "total_score": 9,
    "max_score": 10,
    "percentage": 90,
    "analysis": { "Openness": "High", "Conscientiousness": "Very High" }
  }})
}

impl FakeRemote {
  pub async fn start() -> Self {
    let state: Shared = Arc::new(Mutex::new(FakeState::default()));
    {
      let mut s = state.lock().unwrap();
      let questions = json!([question(1, "Openness"), question(2, "Conscientiousness")]);
      let defaults = [
        ("signup", json!({ "message": "User registered successfully" })),
        ("signin", json!({ "user": { "_id": "u1", "name": "Ama", "email": "ama@x.org", "role": "TVET" } })),
        ("generate_test", json!({ "mcqs_id": "m1", "message": "MCQs generated", "questions": questions })),
        ("get_mcqs", json!({ "document_id": "m1", "questions": questions })),
        ("submit_answers", result_body()),
        ("get_result_by_id", result_body()),
        ("jobs", json!([
          { "_id": "j1", "title": "Electrician", "company": "Volta Works", "requirements": ["Wiring"] },
          { "_id": "j2", "title": "Plumber" }
        ])),
        ("submit-user-data", json!({ "success": true, "message": "Application received" })),
      ];
      for (route, body) in defaults {
        s.responses.insert(route, (StatusCode::OK, Body::Json(body)));
      }
    }

    let app = Router::new()
      .route("/signup", post(|State(s): State<Shared>, Json(b): Json<Value>| async move { respond(&s, "signup", Some(b)).await }))
      .route("/signin", post(|State(s): State<Shared>, Json(b): Json<Value>| async move { respond(&s, "signin", Some(b)).await }))
      .route(
        "/generate_test",
        post(|State(s): State<Shared>, Json(b): Json<Value>| async move { respond(&s, "generate_test", Some(b)).await }),
      )
      .route(
        "/get_mcqs/:user_id",
        get(|State(s): State<Shared>, Path(user_id): Path<String>| async move {
          s.lock().unwrap().last_path_user = Some(user_id);
          respond(&s, "get_mcqs", None).await
        }),
      )
      .route(
        "/submit_answers",
        post(|State(s): State<Shared>, Json(b): Json<Value>| async move { respond(&s, "submit_answers", Some(b)).await }),
      )
      .route(
        "/get_result_by_id",
        get(|State(s): State<Shared>, Query(q): Query<HashMap<String, String>>| async move {
          respond(&s, "get_result_by_id", Some(json!(q))).await
        }),
      )
      .route("/jobs", get(|State(s): State<Shared>| async move { respond(&s, "jobs", None).await }))
      .route("/submit-user-data", post(receive_user_data))
      .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });

    Self { base_url: format!("http://{}", addr), state }
  }

  pub fn config(&self) -> RemoteConfig {
    RemoteConfig {
      base_url: self.base_url.clone(),
      timeout_secs: 5,
      max_retries: 2,
      backoff_base_ms: 1,
      ..RemoteConfig::default()
    }
  }

  pub fn api(&self) -> AssessmentApi {
    AssessmentApi::new(&self.config()).unwrap()
  }

  pub fn set_json(&self, route: &'static str, status: StatusCode, body: Value) {
    self.state.lock().unwrap().responses.insert(route, (status, Body::Json(body)));
  }

  pub fn set_text(&self, route: &'static str, status: StatusCode, body: &str) {
    self.state.lock().unwrap().responses.insert(route, (status, Body::Text(body.to_string())));
  }

  pub fn fail_first(&self, route: &'static str, times: u32) {
    self.state.lock().unwrap().fail_first.insert(route, times);
  }

  pub fn delay(&self, route: &'static str, d: Duration) {
    self.state.lock().unwrap().delays.insert(route, d);
  }

  pub fn hits(&self, route: &'static str) -> u32 {
    self.state.lock().unwrap().hits.get(route).copied().unwrap_or(0)
  }

  pub fn last_body(&self, route: &'static str) -> Option<Value> {
    self.state.lock().unwrap().last_body.get(route).cloned()
  }

  pub fn last_path_user(&self) -> Option<String> {
    self.state.lock().unwrap().last_path_user.clone()
  }

  pub fn multipart_fields(&self) -> Vec<(String, String)> {
    self.state.lock().unwrap().multipart_fields.clone()
  }
}

async fn respond(state: &Shared, route: &'static str, body: Option<Value>) -> Response {
  let (canned, delay, fail) = {
    let mut s = state.lock().unwrap();
    *s.hits.entry(route).or_default() += 1;
    if let Some(b) = body {
      s.last_body.insert(route, b);
    }
    let fail = match s.fail_first.get_mut(route) {
      Some(n) if *n > 0 => {
        *n -= 1;
        true
      }
      _ => false,
    };
    let canned = s.responses.get(route).cloned();
    (canned, s.delays.get(route).copied(), fail)
  };
  if let Some(d) = delay {
    tokio::time::sleep(d).await;
  }
  if fail {
    return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "temporarily unavailable" }))).into_response();
  }
  match canned {
    Some((status, Body::Json(v))) => (status, Json(v)).into_response(),
    Some((status, Body::Text(t))) => (status, t).into_response(),
    None => StatusCode::NOT_FOUND.into_response(),
  }
}

async fn receive_user_data(State(state): State<Shared>, mut form: Multipart) -> Response {
  let mut fields = Vec::new();
  while let Some(field) = form.next_field().await.unwrap() {
    let name = field.name().unwrap_or_default().to_string();
    let file_name = field.file_name().map(str::to_string);
    let bytes = field.bytes().await.unwrap();
    let value = match file_name {
      Some(f) => format!("file:{}:{}", f, bytes.len()),
      None => String::from_utf8_lossy(&bytes).to_string(),
    };
    fields.push((name, value));
  }
  state.lock().unwrap().multipart_fields = fields;
  respond(&state, "submit-user-data", None).await
}
