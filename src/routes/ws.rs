//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic; every request gets one JSON reply.
//!
//! The socket must be attached to a signed-in session first (`attach`). Requests run
//! as tasks so the loop keeps reading; the session flow lock answers `busy` to overlapping
//! actions. Closing the socket cancels whatever remote call is still in flight.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::domain::{ApplicantDetails, CvFile};
use crate::error::{PortalError, Result};
use crate::logic;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "assessment_portal", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
  info!(target: "assessment_portal", "WebSocket connected");
  let (mut sink, mut stream) = socket.split();
  let (tx, mut rx) = mpsc::unbounded_channel::<ServerWsMessage>();
  let cancel = CancelToken::new();

  let writer = tokio::spawn(async move {
    while let Some(reply) = rx.recv().await {
      let out = serde_json::to_string(&reply).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "code": "INTERNAL", "message": format!("Serialization error: {}", e) }).to_string()
      });
      if let Err(e) = sink.send(Message::Text(out)).await {
        error!(target: "assessment_portal", error = %e, "WS send error");
        break;
      }
    }
  });

  let mut attached: Option<Uuid> = None;
  while let Some(Ok(msg)) = stream.next().await {
    let txt = match msg {
      Message::Text(txt) => txt,
      Message::Close(_) => break,
      _ => continue,
    };
    let incoming = match serde_json::from_str::<ClientWsMessage>(&txt) {
      Ok(m) => m,
      Err(e) => {
        let _ = tx.send(ServerWsMessage::Error { code: "INVALID_MESSAGE".into(), message: format!("Invalid JSON: {}", e) });
        continue;
      }
    };
    debug!(target: "assessment_portal", "WS received: {:?}", msg_kind(&incoming));

    match incoming {
      ClientWsMessage::Ping => {
        let _ = tx.send(ServerWsMessage::Pong);
      }
      ClientWsMessage::Attach { session_id } => {
        let reply = match attach(&state, &session_id).await {
          Ok((id, user)) => {
            attached = Some(id);
            ServerWsMessage::Attached { user }
          }
          Err(e) => e.into(),
        };
        let _ = tx.send(reply);
      }
      other => {
        let Some(session_id) = attached else {
          let _ = tx.send(PortalError::Unauthorized.into());
          continue;
        };
        let state = state.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
          let reply = handle_client_ws(other, &state, session_id, &cancel).await.unwrap_or_else(Into::into);
          let _ = tx.send(reply);
        });
      }
    }
  }

  cancel.cancel();
  drop(tx);
  let _ = writer.await;
  info!(target: "assessment_portal", session_id = ?attached, "WebSocket disconnected");
}

async fn attach(state: &AppState, raw: &str) -> Result<(Uuid, crate::domain::User)> {
  let id = Uuid::parse_str(raw.trim()).map_err(|_| PortalError::Unauthorized)?;
  let ctx = state.sessions.snapshot(id).await?;
  Ok((id, ctx.user))
}

#[instrument(level = "info", skip(msg, state, cancel), fields(kind = msg_kind(&msg)))]
async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &AppState,
  session_id: Uuid,
  cancel: &CancelToken,
) -> Result<ServerWsMessage> {
  Ok(match msg {
    ClientWsMessage::AcquireTest => {
      let test = logic::acquire_test(state, session_id, cancel).await?;
      info!(target: "assessment", %session_id, questions = test.questions.len(), "WS test served");
      ServerWsMessage::Test { test: test.into() }
    }

    ClientWsMessage::Question { index } => ServerWsMessage::Question {
      view: logic::question_view(state, session_id, index).await?,
    },

    ClientWsMessage::Answer { index, score } => ServerWsMessage::Progress {
      progress: logic::record_answer(state, session_id, index, score).await?,
    },

    ClientWsMessage::Submit => {
      let result = logic::submit_answers(state, session_id, cancel).await?;
      info!(target: "assessment", %session_id, percentage = result.result.percentage, source = ?result.source, "WS submission resolved");
      ServerWsMessage::Result { result }
    }

    ClientWsMessage::Result => ServerWsMessage::LastResult {
      result: logic::last_result(state, session_id).await?,
    },

    ClientWsMessage::ListJobs => ServerWsMessage::Jobs {
      jobs: logic::list_jobs(state, session_id, cancel).await?,
    },

    ClientWsMessage::SelectJob { job_id } => ServerWsMessage::JobSelected {
      job: logic::select_job(state, session_id, &job_id, cancel).await?,
    },

    ClientWsMessage::SubmitApplication {
      name,
      email,
      phone,
      experience,
      education,
      skills,
      cv_base64,
      file_name,
      content_type,
    } => {
      let cv = decode_cv(cv_base64, file_name, content_type)?;
      let details = ApplicantDetails { name, email, phone, experience, education, skills, cv };
      ServerWsMessage::Application {
        application: logic::submit_application(state, session_id, details, cancel).await?,
      }
    }

    ClientWsMessage::Report => ServerWsMessage::Report {
      report: logic::adof_report(state, session_id).await?,
    },

    ClientWsMessage::Ping | ClientWsMessage::Attach { .. } => ServerWsMessage::Pong,
  })
}

fn decode_cv(data: Option<String>, file_name: Option<String>, content_type: Option<String>) -> Result<Option<CvFile>> {
  let Some(data) = data.filter(|d| !d.trim().is_empty()) else {
    return Ok(None);
  };
  // Accept data URLs ("data:application/pdf;base64,....") as produced by FileReader.
  let payload = data.split_once(";base64,").map(|(_, p)| p).unwrap_or(&data);
  let bytes = STANDARD
    .decode(payload.trim())
    .map_err(|e| PortalError::Validation(format!("CV file is not valid base64: {}", e)))?;
  let file_name = file_name
    .filter(|f| !f.trim().is_empty())
    .ok_or_else(|| PortalError::Validation("CV file name is required".into()))?;
  Ok(Some(CvFile { file_name, content_type, bytes }))
}

fn msg_kind(msg: &ClientWsMessage) -> &'static str {
  match msg {
    ClientWsMessage::Ping => "ping",
    ClientWsMessage::Attach { .. } => "attach",
    ClientWsMessage::AcquireTest => "acquire_test",
    ClientWsMessage::Question { .. } => "question",
    ClientWsMessage::Answer { .. } => "answer",
    ClientWsMessage::Submit => "submit",
    ClientWsMessage::Result => "result",
    ClientWsMessage::ListJobs => "list_jobs",
    ClientWsMessage::SelectJob { .. } => "select_job",
    ClientWsMessage::SubmitApplication { .. } => "submit_application",
    ClientWsMessage::Report => "report",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PortalConfig;
  use crate::domain::SignIn;
  use crate::routes::build_router;
  use crate::testing::FakeRemote;
  use serde_json::{json, Value};
  use std::time::{Duration, Instant};
  use tokio::net::TcpStream;
  use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

  type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

  async fn serve(fake: &FakeRemote) -> (Arc<AppState>, Client) {
    let cfg = PortalConfig { remote: fake.config(), ..PortalConfig::default() };
    let state = Arc::new(AppState::new(cfg).unwrap());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone());
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    (state, client)
  }

  async fn send(client: &mut Client, v: Value) {
    client.send(WsMessage::Text(v.to_string())).await.unwrap();
  }

  async fn recv(client: &mut Client) -> Value {
    loop {
      let msg = tokio::time::timeout(Duration::from_secs(5), client.next()).await.unwrap().unwrap().unwrap();
      if let WsMessage::Text(txt) = msg {
        return serde_json::from_str(&txt).unwrap();
      }
    }
  }

  #[tokio::test]
  async fn socket_requires_attach_and_reports_bad_json() {
    let fake = FakeRemote::start().await;
    let (state, mut client) = serve(&fake).await;

    send(&mut client, json!({ "type": "acquire_test" })).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "UNAUTHORIZED");
    assert_eq!(fake.hits("generate_test"), 0);

    client.send(WsMessage::Text("{not json".into())).await.unwrap();
    assert_eq!(recv(&mut client).await["code"], "INVALID_MESSAGE");

    let creds = SignIn { email: "ama@x.org".into(), password: "pw".into() };
    let ctx = logic::sign_in(&state, &creds, &CancelToken::never()).await.unwrap();
    send(&mut client, json!({ "type": "attach", "sessionId": ctx.id.to_string() })).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["type"], "attached");
    assert_eq!(reply["user"]["id"], "u1");

    send(&mut client, json!({ "type": "acquire_test" })).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["type"], "test");
    assert_eq!(reply["test"]["documentId"], "m1");
  }

  #[tokio::test]
  async fn closing_the_socket_cancels_the_remote_call() {
    let fake = FakeRemote::start().await;
    fake.delay("generate_test", Duration::from_secs(30));
    let (state, mut client) = serve(&fake).await;

    let creds = SignIn { email: "ama@x.org".into(), password: "pw".into() };
    let ctx = logic::sign_in(&state, &creds, &CancelToken::never()).await.unwrap();
    send(&mut client, json!({ "type": "attach", "sessionId": ctx.id.to_string() })).await;
    assert_eq!(recv(&mut client).await["type"], "attached");

    send(&mut client, json!({ "type": "acquire_test" })).await;
    let started = Instant::now();
    while fake.hits("generate_test") == 0 {
      assert!(started.elapsed() < Duration::from_secs(5), "generate_test never reached the remote");
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(matches!(state.sessions.begin(ctx.id).await, Err(PortalError::Busy)));

    client.close(None).await.unwrap();

    // The flow lock is released once the cancelled call unwinds, well before the
    // remote delay or the client timeout would end it.
    let closed = Instant::now();
    loop {
      match state.sessions.begin(ctx.id).await {
        Ok(_) => break,
        Err(PortalError::Busy) => {
          assert!(closed.elapsed() < Duration::from_secs(2), "remote call was not cancelled");
          tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(e) => panic!("unexpected error: {}", e),
      }
    }
    assert_eq!(fake.hits("generate_test"), 1);
    assert!(state.sessions.snapshot(ctx.id).await.unwrap().test.is_none());
  }

  #[test]
  fn client_messages_parse() {
    let m: ClientWsMessage = serde_json::from_str(r#"{"type":"answer","index":3,"score":4}"#).unwrap();
    assert!(matches!(m, ClientWsMessage::Answer { index: 3, score: 4 }));
    let m: ClientWsMessage = serde_json::from_str(r#"{"type":"select_job","jobId":"j1"}"#).unwrap();
    assert_eq!(msg_kind(&m), "select_job");
  }

  #[test]
  fn cv_accepts_plain_and_data_url_base64() {
    let plain = decode_cv(Some("JVBERg==".into()), Some("cv.pdf".into()), None).unwrap().unwrap();
    assert_eq!(plain.bytes, b"%PDF");
    let url = decode_cv(Some("data:application/pdf;base64,JVBERg==".into()), Some("cv.pdf".into()), None)
      .unwrap()
      .unwrap();
    assert_eq!(url.bytes, b"%PDF");
    assert!(decode_cv(None, None, None).unwrap().is_none());
  }

  #[test]
  fn cv_requires_name_and_valid_payload() {
    assert!(decode_cv(Some("JVBERg==".into()), None, None).is_err());
    assert!(decode_cv(Some("***".into()), Some("cv.pdf".into()), None).is_err());
  }
}
