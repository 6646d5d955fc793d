//! Small helper shared by the ping adapter and the raw-stream behaviours:
//! correlates a per-peer request with the eventual swarm-driven reply by
//! queuing a oneshot sender per outstanding call.

use {
  futures::future::BoxFuture,
  libp2p::PeerId,
  parking_lot::Mutex,
  std::{collections::HashMap, collections::VecDeque, sync::Arc},
  tokio::sync::oneshot,
};

pub struct PendingReplies<T> {
  inner: Arc<Mutex<HashMap<PeerId, VecDeque<oneshot::Sender<T>>>>>,
}

impl<T> Clone for PendingReplies<T> {
  fn clone(&self) -> Self {
    Self { inner: self.inner.clone() }
  }
}

impl<T> Default for PendingReplies<T> {
  fn default() -> Self {
    Self { inner: Arc::new(Mutex::new(HashMap::new())) }
  }
}

impl<T: Send + 'static> PendingReplies<T> {
  /// Registers interest in the next reply for `peer` and returns a future
  /// that resolves when `fulfill` is called for it (or never, if the
  /// sending half is dropped without a reply — the caller's future then
  /// never completes, matching "no timeout" semantics left to the
  /// underlying primitive).
  pub fn register(&self, peer: PeerId) -> BoxFuture<'static, T> {
    let (tx, rx) = oneshot::channel();
    self.inner.lock().entry(peer).or_default().push_back(tx);
    Box::pin(async move { rx.await.expect("sender dropped without a reply") })
  }

  /// Delivers `value` to the oldest outstanding registration for `peer`, if
  /// any. Extra/unmatched replies are silently dropped.
  pub fn fulfill(&self, peer: PeerId, value: T) {
    if let Some(queue) = self.inner.lock().get_mut(&peer) {
      if let Some(tx) = queue.pop_front() {
        let _ = tx.send(value);
      }
    }
  }
}
