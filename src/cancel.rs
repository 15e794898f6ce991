//! Cancellation token shared between a connection and the remote calls it started.

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct CancelToken {
  tx: std::sync::Arc<watch::Sender<bool>>,
  rx: watch::Receiver<bool>,
}

impl CancelToken {
  pub fn new() -> Self {
    let (tx, rx) = watch::channel(false);
    Self { tx: std::sync::Arc::new(tx), rx }
  }

  /// A token nobody will ever cancel (plain HTTP requests).
  pub fn never() -> Self {
    Self::new()
  }

  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once `cancel` has been called on any clone.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    // The sender lives as long as any clone of self, so this only ends on `true`.
    let _ = rx.wait_for(|c| *c).await;
  }
}

impl Default for CancelToken {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn clones_observe_cancellation() {
    let token = CancelToken::new();
    let waiter = token.clone();
    let handle = tokio::spawn(async move { waiter.cancelled().await });
    assert!(!token.is_cancelled());
    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert!(token.is_cancelled());
  }

  #[tokio::test]
  async fn never_token_stays_pending() {
    let token = CancelToken::never();
    let res = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
    assert!(res.is_err());
  }
}
