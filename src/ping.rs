//! Ping primitive: this crate consumes RTT probing, it does not reimplement
//! it. Expressed as a collaborator trait so the heartbeat monitor can be
//! driven deterministically in tests with a scripted double.

use {futures::future::BoxFuture, libp2p::PeerId};

/// Round-trip liveness probe with an internal timeout; one result per call.
pub trait PingService: Send + Sync {
  fn ping(&self, peer: PeerId) -> BoxFuture<'static, Result<(), PingFailure>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFailure;

impl std::fmt::Display for PingFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "ping failed or timed out")
  }
}

impl std::error::Error for PingFailure {}

/// Adapter over `libp2p::ping::Behaviour`. The swarm driver (`node.rs`)
/// routes `libp2p::ping::Event`s into a per-peer table of pending oneshot
/// responders that `ping()` calls register into; this type is just the
/// client-facing half of that router.
pub struct LibP2pPing {
  router: crate::router::PendingReplies<Result<(), PingFailure>>,
}

impl LibP2pPing {
  pub fn new(router: crate::router::PendingReplies<Result<(), PingFailure>>) -> Self {
    Self { router }
  }
}

impl PingService for LibP2pPing {
  fn ping(&self, peer: PeerId) -> BoxFuture<'static, Result<(), PingFailure>> {
    self.router.register(peer)
  }
}
