//! Explicit per-user session context, created on sign-in and destroyed on sign-out.
//!
//! The store hands out snapshots; mutations go through `update` so a failed flow
//! never leaves half-applied state behind. Each session also carries a flow lock:
//! at most one remote-backed action runs per session at a time.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::answers::AnswerSheet;
use crate::domain::{CvReceipt, GeneratedTest, Job, SubmissionResult, User};
use crate::error::{PortalError, Result};

/// A test being answered.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveTest {
  pub test: GeneratedTest,
  pub sheet: AnswerSheet,
}

impl ActiveTest {
  pub fn new(test: GeneratedTest) -> Self {
    let sheet = AnswerSheet::new(test.questions.len());
    Self { test, sheet }
  }
}

/// Progress through the ADOF flow (job -> CV -> test -> report).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AdofProgress {
  pub job: Option<Job>,
  pub application: Option<ApplicationRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApplicationRecord {
  pub job_id: String,
  pub cv_file: Option<String>,
  pub receipt: CvReceipt,
  pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct SessionContext {
  pub id: Uuid,
  pub user: User,
  pub started_at: DateTime<Utc>,
  pub test: Option<ActiveTest>,
  /// The test the last result was scored against (kept for the report).
  pub scored_test: Option<GeneratedTest>,
  pub last_result: Option<SubmissionResult>,
  pub adof: AdofProgress,
}

struct SessionEntry {
  ctx: SessionContext,
  flow: Arc<Mutex<()>>,
  last_seen: Instant,
}

impl SessionEntry {
  fn expired(&self, now: Instant, idle_ttl: Duration) -> bool {
    now.saturating_duration_since(self.last_seen) > idle_ttl
  }
}

/// Sessions idle for longer than `idle_ttl` are treated as signed out and reclaimed,
/// either lazily on access or by `sweep_expired`.
#[derive(Clone)]
pub struct SessionStore {
  inner: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
  idle_ttl: Duration,
}

/// Held for the duration of one remote-backed action.
pub struct FlowGuard {
  _guard: OwnedMutexGuard<()>,
}

impl SessionStore {
  pub fn new(idle_ttl: Duration) -> Self {
    Self { inner: Arc::default(), idle_ttl }
  }

  #[instrument(level = "debug", skip(self, user), fields(user_id = %user.id, role = %user.role))]
  pub async fn create(&self, user: User) -> SessionContext {
    let ctx = SessionContext {
      id: Uuid::new_v4(),
      user,
      started_at: Utc::now(),
      test: None,
      scored_test: None,
      last_result: None,
      adof: AdofProgress::default(),
    };
    self.inner.write().await.insert(
      ctx.id,
      SessionEntry { ctx: ctx.clone(), flow: Arc::new(Mutex::new(())), last_seen: Instant::now() },
    );
    info!(target: "assessment", session_id = %ctx.id, "Session created");
    ctx
  }

  /// Removes the session; returns whether it existed.
  #[instrument(level = "debug", skip(self))]
  pub async fn destroy(&self, id: Uuid) -> bool {
    let existed = self.inner.write().await.remove(&id).is_some();
    if existed {
      info!(target: "assessment", session_id = %id, "Session destroyed");
    }
    existed
  }

  pub async fn snapshot(&self, id: Uuid) -> Result<SessionContext> {
    self.touch(id, |e| e.ctx.clone()).await
  }

  /// Apply `f` to the live context. Fails if the session was destroyed meanwhile.
  pub async fn update<T>(&self, id: Uuid, f: impl FnOnce(&mut SessionContext) -> T) -> Result<T> {
    self.touch(id, |e| f(&mut e.ctx)).await
  }

  /// Claim the session's flow lock or fail with `Busy`.
  pub async fn begin(&self, id: Uuid) -> Result<FlowGuard> {
    let flow = self.touch(id, |e| e.flow.clone()).await?;
    let guard = flow.try_lock_owned().map_err(|_| PortalError::Busy)?;
    Ok(FlowGuard { _guard: guard })
  }

  pub async fn len(&self) -> usize {
    self.inner.read().await.len()
  }

  /// Drop every idle session; returns how many were removed.
  pub async fn sweep_expired(&self) -> usize {
    let now = Instant::now();
    let mut map = self.inner.write().await;
    let before = map.len();
    // A session with an action in flight is not idle.
    map.retain(|_, e| !e.expired(now, self.idle_ttl) || e.flow.try_lock().is_err());
    before - map.len()
  }

  /// Periodic sweep, spawned once at startup.
  pub async fn run_sweeper(self, every: Duration) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      tick.tick().await;
      let removed = self.sweep_expired().await;
      if removed > 0 {
        let remaining = self.len().await;
        info!(target: "assessment", removed, remaining, "Expired idle sessions");
      }
    }
  }

  /// Run `f` on a live entry and refresh its idle clock; expired entries are removed.
  async fn touch<T>(&self, id: Uuid, f: impl FnOnce(&mut SessionEntry) -> T) -> Result<T> {
    let now = Instant::now();
    let mut map = self.inner.write().await;
    let entry = map.get_mut(&id).ok_or(PortalError::Unauthorized)?;
    if entry.expired(now, self.idle_ttl) && entry.flow.try_lock().is_ok() {
      map.remove(&id);
      info!(target: "assessment", session_id = %id, "Session expired");
      return Err(PortalError::Unauthorized);
    }
    entry.last_seen = now;
    Ok(f(entry))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Role;

  fn user() -> User {
    User { id: "u1".into(), name: "Ama".into(), email: None, role: Role::Tvet }
  }

  #[tokio::test]
  async fn create_snapshot_destroy() {
    let store = SessionStore::new(Duration::from_secs(60));
    let ctx = store.create(user()).await;
    assert_eq!(store.snapshot(ctx.id).await.unwrap().user.id, "u1");
    assert!(store.destroy(ctx.id).await);
    assert!(!store.destroy(ctx.id).await);
    assert!(matches!(store.snapshot(ctx.id).await, Err(PortalError::Unauthorized)));
  }

  #[tokio::test]
  async fn flow_lock_rejects_second_action() {
    let store = SessionStore::new(Duration::from_secs(60));
    let ctx = store.create(user()).await;
    let guard = store.begin(ctx.id).await.unwrap();
    assert!(matches!(store.begin(ctx.id).await, Err(PortalError::Busy)));
    drop(guard);
    assert!(store.begin(ctx.id).await.is_ok());
  }

  #[tokio::test]
  async fn sessions_are_isolated() {
    let store = SessionStore::new(Duration::from_secs(60));
    let a = store.create(user()).await;
    let b = store.create(user()).await;
    let _guard = store.begin(a.id).await.unwrap();
    assert!(store.begin(b.id).await.is_ok());
    store.update(a.id, |c| c.last_result = None).await.unwrap();
    assert_eq!(store.len().await, 2);
  }

  #[tokio::test]
  async fn idle_session_expires_on_access() {
    let store = SessionStore::new(Duration::from_millis(20));
    let ctx = store.create(user()).await;
    assert!(store.snapshot(ctx.id).await.is_ok());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(matches!(store.snapshot(ctx.id).await, Err(PortalError::Unauthorized)));
    assert_eq!(store.len().await, 0);
  }

  #[tokio::test]
  async fn activity_keeps_a_session_alive() {
    let store = SessionStore::new(Duration::from_millis(80));
    let ctx = store.create(user()).await;
    for _ in 0..4 {
      tokio::time::sleep(Duration::from_millis(30)).await;
      store.snapshot(ctx.id).await.unwrap();
    }
  }

  #[tokio::test]
  async fn sweep_reclaims_idle_sessions_but_not_busy_ones() {
    let store = SessionStore::new(Duration::from_millis(20));
    let idle = store.create(user()).await;
    let busy = store.create(user()).await;
    let _guard = store.begin(busy.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.sweep_expired().await, 1);
    assert!(matches!(store.snapshot(idle.id).await, Err(PortalError::Unauthorized)));
    assert_eq!(store.len().await, 1);
  }

  #[tokio::test]
  async fn update_after_destroy_is_unauthorized() {
    let store = SessionStore::new(Duration::from_secs(60));
    let ctx = store.create(user()).await;
    store.destroy(ctx.id).await;
    assert!(matches!(store.update(ctx.id, |_| ()).await, Err(PortalError::Unauthorized)));
  }
}
