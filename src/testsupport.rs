//! In-memory doubles for the collaborator traits, used only by this crate's
//! own tests. No production code depends on this module.

use {
  crate::{
    error::PeerFault,
    ping::{PingFailure, PingService},
    transport::{GameEndpoint, GameSender, GatherEndpoint, GatherSender, Transport},
    wire::{AddrInfo, Direction, GatherMessage},
  },
  futures::future::BoxFuture,
  libp2p::PeerId,
  parking_lot::Mutex,
  std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
  },
  tokio::sync::mpsc,
};

/// Plays back a fixed sequence of ping outcomes, one per call; once
/// exhausted, every further call succeeds.
pub struct ScriptedPing {
  script: Mutex<VecDeque<Result<(), ()>>>,
}

impl ScriptedPing {
  pub fn new(script: Vec<Result<(), ()>>) -> Self {
    Self { script: Mutex::new(script.into()) }
  }
}

impl PingService for ScriptedPing {
  fn ping(&self, _peer: PeerId) -> BoxFuture<'static, Result<(), PingFailure>> {
    let next = self.script.lock().pop_front().unwrap_or(Ok(()));
    Box::pin(async move { next.map_err(|()| PingFailure) })
  }
}

/// An in-memory fan-out standing in for a real `libp2p::request_response`
/// game channel: `negotiate_seed` is answered directly from the target
/// peer's own registered contribution rather than over a wire round-trip,
/// and `send_move` delivers straight into the target's `inbound_moves`
/// channel.
pub struct MemoryGameNetwork {
  peers: Arc<Mutex<HashMap<PeerId, GamePeerState>>>,
}

struct GamePeerState {
  contribution: u32,
  inbound_moves_tx: mpsc::UnboundedSender<(PeerId, Direction)>,
  closed_tx: mpsc::UnboundedSender<PeerId>,
}

pub struct RegisteredGameEndpoint {
  pub sender: Arc<dyn GameSender>,
  pub inbound_moves: mpsc::UnboundedReceiver<(PeerId, Direction)>,
  pub closed: mpsc::UnboundedReceiver<PeerId>,
  /// This peer's own stable contribution, the same value `negotiate_seed`
  /// hands back to anyone else negotiating with it.
  pub contribution: u32,
}

impl MemoryGameNetwork {
  pub fn new() -> Self {
    Self { peers: Arc::new(Mutex::new(HashMap::new())) }
  }

  pub fn register(&self, peer: PeerId) -> RegisteredGameEndpoint {
    let (inbound_moves_tx, inbound_moves) = mpsc::unbounded_channel();
    let (closed_tx, closed) = mpsc::unbounded_channel();
    let contribution = rand::random();

    self.peers.lock().insert(peer, GamePeerState { contribution, inbound_moves_tx, closed_tx });

    let sender = Arc::new(MemoryGameSender { self_id: peer, peers: self.peers.clone() });
    RegisteredGameEndpoint { sender, inbound_moves, closed, contribution }
  }

  /// Delivers a stream-end notification for `from` to `to`, as if `to`'s
  /// connection to `from` just closed.
  pub fn simulate_stream_end(&self, from: PeerId, to: PeerId) {
    if let Some(state) = self.peers.lock().get(&to) {
      let _ = state.closed_tx.send(from);
    }
  }
}

impl Default for MemoryGameNetwork {
  fn default() -> Self {
    Self::new()
  }
}

struct MemoryGameSender {
  self_id: PeerId,
  peers: Arc<Mutex<HashMap<PeerId, GamePeerState>>>,
}

impl GameSender for MemoryGameSender {
  fn dial(&self, _info: AddrInfo) -> BoxFuture<'static, Result<(), PeerFault>> {
    Box::pin(async { Ok(()) })
  }

  fn negotiate_seed(&self, peer: PeerId, _r_self: u32) -> BoxFuture<'static, Result<u32, PeerFault>> {
    let contribution = self.peers.lock().get(&peer).map(|s| s.contribution);
    Box::pin(async move { contribution.ok_or(PeerFault::StreamClosed) })
  }

  fn send_move(&self, peer: PeerId, dir: Direction) {
    if let Some(state) = self.peers.lock().get(&peer) {
      let _ = state.inbound_moves_tx.send((self.self_id, dir));
    }
  }

  fn disconnect(&self, _peer: PeerId) {}
}

/// An in-memory fan-out standing in for a real `libp2p::request_response`
/// gather channel: `send` delivers straight into the target's `inbound`
/// channel, tagged with the sender's own registered address.
pub struct MemoryGatherNetwork {
  peers: Arc<Mutex<HashMap<PeerId, GatherPeerState>>>,
}

struct GatherPeerState {
  addr: AddrInfo,
  inbound_tx: mpsc::UnboundedSender<(AddrInfo, GatherMessage)>,
  closed_tx: mpsc::UnboundedSender<PeerId>,
  connected_tx: mpsc::UnboundedSender<AddrInfo>,
  contacted: bool,
}

pub struct RegisteredGatherEndpoint {
  pub sender: Arc<dyn GatherSender>,
  pub connected: mpsc::UnboundedReceiver<AddrInfo>,
  pub inbound: mpsc::UnboundedReceiver<(AddrInfo, GatherMessage)>,
  pub closed: mpsc::UnboundedReceiver<PeerId>,
}

impl MemoryGatherNetwork {
  pub fn new() -> Self {
    Self { peers: Arc::new(Mutex::new(HashMap::new())) }
  }

  pub fn register(&self, addr: AddrInfo) -> RegisteredGatherEndpoint {
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (closed_tx, closed) = mpsc::unbounded_channel();
    let (connected_tx, connected) = mpsc::unbounded_channel();

    self.peers.lock().insert(
      addr.peer_id,
      GatherPeerState { addr: addr.clone(), inbound_tx, closed_tx, connected_tx, contacted: false },
    );

    let sender = Arc::new(MemoryGatherSender { self_addr: addr, peers: self.peers.clone() });
    RegisteredGatherEndpoint { sender, connected, inbound, closed }
  }

  pub fn simulate_stream_end(&self, from: PeerId, to: PeerId) {
    if let Some(state) = self.peers.lock().get(&to) {
      let _ = state.closed_tx.send(from);
    }
  }
}

impl Default for MemoryGatherNetwork {
  fn default() -> Self {
    Self::new()
  }
}

struct MemoryGatherSender {
  self_addr: AddrInfo,
  peers: Arc<Mutex<HashMap<PeerId, GatherPeerState>>>,
}

impl GatherSender for MemoryGatherSender {
  fn dial(&self, _info: AddrInfo) -> BoxFuture<'static, Result<(), PeerFault>> {
    Box::pin(async { Ok(()) })
  }

  fn send(&self, peer: PeerId, msg: GatherMessage) {
    if let Some(state) = self.peers.lock().get(&peer) {
      let _ = state.inbound_tx.send((self.self_addr.clone(), msg));
    }
  }

  fn tickle(&self, peer: PeerId) {
    let mut peers = self.peers.lock();
    if let Some(state) = peers.get_mut(&peer) {
      if !state.contacted {
        state.contacted = true;
        let _ = state.connected_tx.send(self.self_addr.clone());
      }
    }
  }

  fn disconnect(&self, _peer: PeerId) {}
}

/// Wraps a shared gather/game network pair so several `MemoryTransport`s
/// (one per simulated node) can dial and message each other. Each transport
/// is scoped to a single node id; a node that needs to be both a facilitator
/// and a joiner at once is outside what this double models, since
/// `MemoryGatherNetwork::register` keys its inbox by peer id alone — fine
/// for the one-role-per-node scenarios this crate's tests exercise, unlike
/// the real swarm, which demultiplexes by connection.
pub struct MemoryTransport {
  self_id: PeerId,
  self_addr: AddrInfo,
  gather_net: Arc<MemoryGatherNetwork>,
  game_net: Arc<MemoryGameNetwork>,
}

impl MemoryTransport {
  pub fn new(
    self_addr: AddrInfo,
    gather_net: Arc<MemoryGatherNetwork>,
    game_net: Arc<MemoryGameNetwork>,
  ) -> Self {
    Self { self_id: self_addr.peer_id, self_addr, gather_net, game_net }
  }
}

impl Transport for MemoryTransport {
  fn gather_endpoint(&self) -> GatherEndpoint {
    let reg = self.gather_net.register(self.self_addr.clone());
    GatherEndpoint { sender: reg.sender, connected: reg.connected, inbound: reg.inbound, closed: reg.closed }
  }

  fn game_endpoint(&self) -> GameEndpoint {
    let reg = self.game_net.register(self.self_id);
    GameEndpoint {
      sender: reg.sender,
      inbound_moves: reg.inbound_moves,
      closed: reg.closed,
      self_contribution: reg.contribution,
    }
  }

  fn dial(&self, _addr: AddrInfo) -> BoxFuture<'static, std::io::Result<()>> {
    Box::pin(async { Ok(()) })
  }
}
