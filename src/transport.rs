//! The stream-level collaborators: a gather endpoint carries `GatherMessage`
//! frames to/from joiners, a game endpoint carries seed contributions and
//! moves to/from game participants. Production implementations sit on
//! `libp2p::request_response` (`libp2p_backend.rs`); tests substitute an
//! in-memory fan-out (`testsupport`).
//!
//! Each endpoint is split into a cheaply-cloneable `*Sender` half (used to
//! issue outbound operations from any task) and an owned pair of `mpsc`
//! receivers (inbound messages, peer-closed notifications) consumed by
//! exactly one task — a `cmdtx: UnboundedSender<Command>` plus split
//! receiver pair, same shape as a gossip topic handle.

use {
  crate::{
    error::PeerFault,
    wire::{AddrInfo, Direction, GatherMessage},
  },
  futures::future::BoxFuture,
  libp2p::PeerId,
  std::sync::Arc,
  tokio::sync::mpsc,
};

pub trait GatherSender: Send + Sync {
  /// Dial `info` so later sends to its peer id succeed.
  fn dial(&self, info: AddrInfo) -> BoxFuture<'static, Result<(), PeerFault>>;
  /// Send a framed `GatherMessage` to `peer`.
  fn send(&self, peer: PeerId, msg: GatherMessage);
  /// Send the rendezvous tickle: first contact, carrying no application
  /// payload.
  fn tickle(&self, peer: PeerId);
  /// Stop tracking `peer` and release any local resources for it.
  fn disconnect(&self, peer: PeerId);
}

pub struct GatherEndpoint {
  pub sender: Arc<dyn GatherSender>,
  /// Fires once per previously-unseen peer establishing a gather-protocol
  /// connection to us — the transport-level counterpart of the joiner's
  /// zero-length rendezvous tickle, which the codec discards as noise
  /// rather than surfacing as a `GatherMessage`. This is how a facilitator
  /// learns a joiner exists before that joiner has sent anything.
  pub connected: mpsc::UnboundedReceiver<AddrInfo>,
  /// Inbound frame tagged with whatever addresses the transport knows for
  /// the sender, since a facilitator needs them to relay `ConnectionRequest`
  /// to other joiners without a separate address-book lookup.
  pub inbound: mpsc::UnboundedReceiver<(AddrInfo, GatherMessage)>,
  pub closed: mpsc::UnboundedReceiver<PeerId>,
}

pub trait GameSender: Send + Sync {
  fn dial(&self, info: AddrInfo) -> BoxFuture<'static, Result<(), PeerFault>>;
  /// Offer `r_self` to `peer` and return the peer's own contribution.
  fn negotiate_seed(
    &self,
    peer: PeerId,
    r_self: u32,
  ) -> BoxFuture<'static, Result<u32, PeerFault>>;
  /// Submit a move to `peer` for the current turn.
  fn send_move(&self, peer: PeerId, dir: Direction);
  fn disconnect(&self, peer: PeerId);
}

pub struct GameEndpoint {
  pub sender: Arc<dyn GameSender>,
  pub inbound_moves: mpsc::UnboundedReceiver<(PeerId, Direction)>,
  pub closed: mpsc::UnboundedReceiver<PeerId>,
  /// This node's own stable seed contribution for the session this
  /// endpoint belongs to. Generated once, at endpoint creation, so it is
  /// already fixed and answerable the moment a peer's `SeedOffer` arrives,
  /// however that races with this node's own `GameInstance::negotiate`
  /// call — and so that every peer who asks for it gets the same value
  /// this node also folds into its own seed.
  pub self_contribution: u32,
}

/// The node-level collaborator that mints gather/game endpoints and
/// performs the raw swarm dial a fresh `join_gather_point` call needs
/// before a gather endpoint has anything to talk to. Production impl is
/// `libp2p_backend::LibP2pTransport`; test impl wraps an in-memory network
/// keyed by this node's own id.
pub trait Transport: Send + Sync {
  fn gather_endpoint(&self) -> GatherEndpoint;
  fn game_endpoint(&self) -> GameEndpoint;
  fn dial(&self, addr: AddrInfo) -> BoxFuture<'static, std::io::Result<()>>;
}
