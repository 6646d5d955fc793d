//! Game instance: seed negotiation plus per-turn move aggregation across a
//! set of pairwise game channels.

use {
  crate::{
    transport::GameSender,
    wire::{AddrInfo, Direction},
  },
  libp2p::PeerId,
  metrics::increment_counter,
  parking_lot::Mutex,
  std::{
    collections::{HashMap, HashSet},
    sync::Arc,
  },
  tokio::sync::{mpsc, oneshot},
  tracing::{info, warn},
};

/// A single aggregated turn, or a peer leaving mid-game.
#[derive(Debug, Clone)]
pub enum GameEvent {
  PlayerMoves(HashMap<PeerId, Direction>),
  PlayerDisconnected(PeerId),
}

struct State {
  peers: HashSet<PeerId>,
}

impl State {
  fn live_count(&self) -> usize {
    self.peers.len() + 1 // +1 for self
  }
}

/// Owns the negotiated seed and the set of currently-live remote
/// participants: for every remote peer there is exactly one game channel,
/// and the instance knows its own peer id.
pub struct GameInstance {
  self_id: PeerId,
  seed: u32,
  state: Arc<Mutex<State>>,
  sender: Arc<dyn GameSender>,
  local_moves_tx: mpsc::UnboundedSender<Direction>,
  events_rx: Mutex<Option<mpsc::UnboundedReceiver<GameEvent>>>,
  close_tx: Mutex<Option<oneshot::Sender<()>>>,
  done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl GameInstance {
  /// Negotiates the shared seed with every member of `others` — offer
  /// `r_self`, read back the peer's own contribution, XOR them all
  /// together — then spawns the turn aggregator. A peer whose seed
  /// exchange fails is treated as a peer loss and excluded from the game
  /// before it starts; transient peer I/O is always a loss of the affected
  /// peer only, never fatal to the rest.
  ///
  /// `r_self` must be the same stable value this node answers with when a
  /// peer's own `SeedOffer` reaches it (`GameEndpoint::self_contribution`),
  /// not a value freshly drawn here — otherwise two honest participants
  /// fold different numbers into their seed and diverge.
  pub async fn negotiate(
    self_id: PeerId,
    r_self: u32,
    others: Vec<AddrInfo>,
    sender: Arc<dyn GameSender>,
    inbound_moves: mpsc::UnboundedReceiver<(PeerId, Direction)>,
    closed: mpsc::UnboundedReceiver<PeerId>,
  ) -> Self {
    let mut seed = r_self;
    let mut peers = HashSet::with_capacity(others.len());

    for addr in &others {
      if let Err(e) = sender.dial(addr.clone()).await {
        warn!(peer = %addr.peer_id, error = %e, "game: dial failed, excluding from game");
        continue;
      }

      match sender.negotiate_seed(addr.peer_id, r_self).await {
        Ok(contribution) => {
          seed ^= contribution;
          peers.insert(addr.peer_id);
        }
        Err(e) => {
          warn!(peer = %addr.peer_id, error = %e, "game: seed negotiation failed, excluding from game");
        }
      }
    }

    info!(seed, participants = peers.len(), "game: seed negotiated");

    let state = Arc::new(Mutex::new(State { peers }));
    let (local_moves_tx, local_moves_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(run_aggregator(
      self_id,
      inbound_moves,
      closed,
      local_moves_rx,
      state.clone(),
      events_tx,
      close_rx,
      done_tx,
    ));

    Self {
      self_id,
      seed,
      state,
      sender,
      local_moves_tx,
      events_rx: Mutex::new(Some(events_rx)),
      close_tx: Mutex::new(Some(close_tx)),
      done_rx: Mutex::new(Some(done_rx)),
    }
  }

  pub fn self_id(&self) -> PeerId {
    self.self_id
  }

  pub fn seed(&self) -> u32 {
    self.seed
  }

  pub fn live_peers(&self) -> Vec<PeerId> {
    self.state.lock().peers.iter().copied().collect()
  }

  /// Submits `d` to every live peer and injects it into the local
  /// aggregator as the local player's submission.
  pub fn send_move(&self, dir: Direction) {
    for peer in self.state.lock().peers.iter().copied() {
      self.sender.send_move(peer, dir);
    }
    let _ = self.local_moves_tx.send(dir);
  }

  /// Takes ownership of the event stream. Callable once; subsequent calls
  /// return `None`.
  pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<GameEvent>> {
    self.events_rx.lock().take()
  }

  /// Signals all reader/aggregator tasks, closes remaining streams, and
  /// waits for tasks to drain. Idempotent.
  pub async fn close(&self) {
    let close_tx = self.close_tx.lock().take();
    let Some(close_tx) = close_tx else {
      return;
    };
    let _ = close_tx.send(());

    for peer in self.state.lock().peers.iter().copied() {
      self.sender.disconnect(peer);
    }

    let done_rx = self.done_rx.lock().take();
    if let Some(done_rx) = done_rx {
      let _ = done_rx.await;
    }
  }
}

#[allow(clippy::too_many_arguments)]
async fn run_aggregator(
  self_id: PeerId,
  mut inbound_moves: mpsc::UnboundedReceiver<(PeerId, Direction)>,
  mut closed: mpsc::UnboundedReceiver<PeerId>,
  mut local_moves: mpsc::UnboundedReceiver<Direction>,
  state: Arc<Mutex<State>>,
  events_tx: mpsc::UnboundedSender<GameEvent>,
  mut close_rx: oneshot::Receiver<()>,
  done_tx: oneshot::Sender<()>,
) {
  let mut pending: HashMap<PeerId, Direction> = HashMap::new();

  loop {
    tokio::select! {
      _ = &mut close_rx => break,
      dir = local_moves.recv() => {
        let Some(dir) = dir else { break };
        pending.insert(self_id, dir);
        maybe_emit(&mut pending, &state, &events_tx);
      }
      msg = inbound_moves.recv() => {
        let Some((peer, dir)) = msg else { continue };
        if !state.lock().peers.contains(&peer) {
          continue;
        }
        pending.insert(peer, dir);
        maybe_emit(&mut pending, &state, &events_tx);
      }
      peer = closed.recv() => {
        let Some(peer) = peer else { continue };
        let removed = state.lock().peers.remove(&peer);
        if removed {
          pending.remove(&peer);
          let _ = events_tx.send(GameEvent::PlayerDisconnected(peer));
          // Poke the aggregator: a turn whose only missing submission was
          // this peer can now be emitted.
          maybe_emit(&mut pending, &state, &events_tx);
        }
      }
    }
  }

  let _ = done_tx.send(());
}

fn maybe_emit(
  pending: &mut HashMap<PeerId, Direction>,
  state: &Arc<Mutex<State>>,
  events_tx: &mpsc::UnboundedSender<GameEvent>,
) {
  let live = state.lock().live_count();
  if pending.len() == live {
    increment_counter!("turns_completed");
    let _ = events_tx.send(GameEvent::PlayerMoves(pending.clone()));
    pending.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn seed_is_xor_of_all_contributions() {
    // Driven over the in-memory game transport; each contribution is drawn
    // at registration time, so the invariant under test is that every
    // honest participant converges on the same value.
    let net = crate::testsupport::MemoryGameNetwork::new();

    let p1 = PeerId::random();
    let p2 = PeerId::random();
    let p3 = PeerId::random();

    let e1 = net.register(p1);
    let e2 = net.register(p2);
    let e3 = net.register(p3);

    let addr = |p: PeerId| AddrInfo::new(p, vec![]);

    let (g1, g2, g3) = tokio::join!(
      GameInstance::negotiate(p1, e1.contribution, vec![addr(p2), addr(p3)], e1.sender, e1.inbound_moves, e1.closed),
      GameInstance::negotiate(p2, e2.contribution, vec![addr(p1), addr(p3)], e2.sender, e2.inbound_moves, e2.closed),
      GameInstance::negotiate(p3, e3.contribution, vec![addr(p1), addr(p2)], e3.sender, e3.inbound_moves, e3.closed),
    );

    assert_eq!(g1.seed(), g2.seed());
    assert_eq!(g2.seed(), g3.seed());

    g1.close().await;
    g2.close().await;
    g3.close().await;
  }

  #[tokio::test]
  async fn turn_aggregation_with_drop_emits_disconnect_then_partial_moves() {
    let net = crate::testsupport::MemoryGameNetwork::new();

    let p1 = PeerId::random();
    let p2 = PeerId::random();
    let p3 = PeerId::random();

    let e1 = net.register(p1);
    let e2 = net.register(p2);
    let e3 = net.register(p3);

    let addr = |p: PeerId| AddrInfo::new(p, vec![]);

    let (g1, g2, _g3) = tokio::join!(
      GameInstance::negotiate(p1, e1.contribution, vec![addr(p2), addr(p3)], e1.sender, e1.inbound_moves, e1.closed),
      GameInstance::negotiate(p2, e2.contribution, vec![addr(p1), addr(p3)], e2.sender, e2.inbound_moves, e2.closed),
      GameInstance::negotiate(p3, e3.contribution, vec![addr(p1), addr(p2)], e3.sender, e3.inbound_moves, e3.closed),
    );

    let mut events = g1.take_events().unwrap();

    g2.send_move(Direction::Up);
    net.simulate_stream_end(p3, p1);

    let first = events.recv().await.unwrap();
    assert!(matches!(first, GameEvent::PlayerDisconnected(p) if p == p3));

    g1.send_move(Direction::Left);

    let second = events.recv().await.unwrap();
    match second {
      GameEvent::PlayerMoves(moves) => {
        assert_eq!(moves.len(), 2);
        assert_eq!(moves.get(&p1), Some(&Direction::Left));
        assert_eq!(moves.get(&p2), Some(&Direction::Up));
      }
      other => panic!("expected PlayerMoves, got {other:?}"),
    }

    g1.close().await;
    g2.close().await;
  }
}
