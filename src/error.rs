//! Crate-wide error taxonomy. Peer-scoped errors are always handled at the
//! component boundary that detected them and never reach a caller, except
//! where a constructor or a direct user call can fail.

use {libp2p::PeerId, thiserror::Error};

/// A fault attributable to a specific remote peer. Never fatal to the
/// component that observes it: it is always translated into a disconnect
/// of that one peer.
#[derive(Debug, Error)]
pub enum PeerFault {
  #[error("ping failed or timed out")]
  PingFailed,

  #[error("stream i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("malformed frame: {0}")]
  Malformed(String),

  #[error("protocol violation: {0}")]
  ProtocolViolation(String),

  #[error("stream closed by peer")]
  StreamClosed,
}

/// Top level crate error. Most components never return this; it exists for
/// the handful of operations that genuinely fail rather than degrading to a
/// per-peer fault (construction, and direct user-facing calls like joining a
/// gather point).
#[derive(Debug, Error)]
pub enum Error {
  #[error("ping service is not available")]
  NoPingService,

  #[error("peer {peer}: {source}")]
  Peer {
    peer: PeerId,
    #[source]
    source: PeerFault,
  },

  #[error("dial peer: {0}")]
  Dial(#[source] std::io::Error),

  #[error("already joined this gather point")]
  AlreadyJoined,

  #[error("already hosting a gather point")]
  AlreadyFacilitating,
}

impl Error {
  pub fn peer(peer: PeerId, source: PeerFault) -> Self {
    Self::Peer { peer, source }
  }
}
