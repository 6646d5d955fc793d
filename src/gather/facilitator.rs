//! Gather facilitator: accepts joiners, maintains the shared peer mesh,
//! orchestrates pairwise joiner connections, and promotes a clique of the
//! desired size into a game.
//!
//! The monitor task, mesh-update task, and per-joiner handler task are
//! collapsed into one event loop here rather than three. The transport
//! already demultiplexes inbound frames, connection and heartbeat events by
//! peer onto their own channels; a further split into separate tasks inside
//! this module would just hand the same events back through another
//! `tokio::select!`, with no gain beyond mirroring task topology for its
//! own sake. Single-writer discipline over the mesh is preserved: only this
//! loop ever touches it.

use {
  crate::{
    gather::GameEstablished,
    game::GameInstance,
    heartbeat::{Heartbeat, HeartbeatEvent},
    mesh::PeerMesh,
    ping::PingService,
    transport::{GameEndpoint, GameSender, GatherEndpoint, GatherSender},
    wire::{AddrInfo, GatherMessage},
  },
  libp2p::PeerId,
  parking_lot::Mutex,
  std::{collections::HashMap, sync::Arc, time::Duration},
  tokio::sync::{mpsc, oneshot},
  tracing::{info, warn},
};

pub struct Facilitator {
  close_tx: Mutex<Option<oneshot::Sender<()>>>,
  done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Facilitator {
  #[allow(clippy::too_many_arguments)]
  pub fn start(
    self_id: PeerId,
    desired_count: u32,
    heartbeat_interval: Duration,
    ping: Arc<dyn PingService>,
    gather: GatherEndpoint,
    game: GameEndpoint,
    established_tx: mpsc::UnboundedSender<GameEstablished>,
  ) -> Self {
    let (close_tx, close_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    let self_contribution = game.self_contribution;

    let state = Inner {
      self_id,
      desired_count: desired_count as usize,
      heartbeat_interval,
      ping,
      gather_sender: gather.sender,
      game_sender: game.sender,
      mesh: PeerMesh::new(),
      joiners: HashMap::new(),
      done: false,
    };

    tokio::spawn(run(
      state,
      self_contribution,
      gather.connected,
      gather.inbound,
      gather.closed,
      game.inbound_moves,
      game.closed,
      established_tx,
      close_rx,
      done_tx,
    ));

    Self { close_tx: Mutex::new(Some(close_tx)), done_rx: Mutex::new(Some(done_rx)) }
  }

  /// Signals the event loop, drains all heartbeats and streams, and waits
  /// for the task to finish. Idempotent.
  pub async fn close(&self) {
    let close_tx = self.close_tx.lock().take();
    let Some(close_tx) = close_tx else {
      return;
    };
    let _ = close_tx.send(());

    let done_rx = self.done_rx.lock().take();
    if let Some(done_rx) = done_rx {
      let _ = done_rx.await;
    }
  }
}

struct Joined {
  addr: AddrInfo,
  heartbeat: Heartbeat,
}

struct Inner {
  self_id: PeerId,
  desired_count: usize,
  heartbeat_interval: Duration,
  ping: Arc<dyn PingService>,
  gather_sender: Arc<dyn GatherSender>,
  game_sender: Arc<dyn GameSender>,
  mesh: PeerMesh,
  joiners: HashMap<PeerId, Joined>,
  done: bool,
}

impl Inner {
  /// First contact from a previously-unseen joiner: spawn its heartbeat.
  /// Idempotent for a given peer.
  fn on_connected(&mut self, addr: AddrInfo, hb_tx: &mpsc::UnboundedSender<HeartbeatEvent>) {
    if self.joiners.contains_key(&addr.peer_id) {
      return;
    }

    match Heartbeat::new(Some(self.ping.clone()), addr.peer_id, self.heartbeat_interval, hb_tx.clone()) {
      Ok(heartbeat) => {
        info!(peer = %addr.peer_id, "facilitator: joiner connected");
        self.joiners.insert(addr.peer_id, Joined { addr, heartbeat });
      }
      Err(e) => warn!(peer = %addr.peer_id, error = %e, "facilitator: cannot heartbeat new joiner"),
    }
  }

  /// Applies a framed message from `from`. Returns the mesh's rescan hint.
  fn on_message(&mut self, from: PeerId, msg: GatherMessage) -> bool {
    match msg {
      GatherMessage::Connected(targets) => {
        let mut rescan = false;
        for t in targets {
          rescan |= self.mesh.add_edge(from, t.peer_id);
        }
        rescan
      }
      GatherMessage::Disconnected(targets) => {
        for t in targets {
          self.mesh.remove_edge(from, t.peer_id);
        }
        false
      }
      other => {
        warn!(peer = %from, ?other, "facilitator: unexpected tag from joiner, ignoring");
        false
      }
    }
  }

  /// Applies a heartbeat transition for a facilitator↔joiner ping. Returns
  /// the mesh's rescan hint.
  async fn on_heartbeat(&mut self, event: HeartbeatEvent) -> bool {
    if event.alive {
      let Some(addr) = self.joiners.get(&event.peer).map(|j| j.addr.clone()) else {
        return false;
      };

      if let Err(e) = self.game_sender.dial(addr.clone()).await {
        warn!(peer = %event.peer, error = %e, "facilitator: game dial failed, dropping joiner");
        self.drop_joiner(event.peer).await;
        return false;
      }

      let rescan = self.mesh.add_edge(self.self_id, event.peer);

      for peer in self.joiners.keys() {
        if *peer == event.peer {
          continue;
        }
        self.gather_sender.send(*peer, GatherMessage::ConnectionRequest(vec![addr.clone()]));
      }

      rescan
    } else {
      self.drop_joiner(event.peer).await;
      false
    }
  }

  /// Atomic removal of a joiner: stream, heartbeat, and mesh bookkeeping.
  async fn drop_joiner(&mut self, peer: PeerId) {
    self.game_sender.disconnect(peer);
    self.gather_sender.disconnect(peer);
    self.mesh.remove_edge(self.self_id, peer);
    self.mesh.remove_peer(peer);

    if let Some(joined) = self.joiners.remove(&peer) {
      joined.heartbeat.close().await;
    }
  }

  fn try_find_clique(&self) -> Option<Vec<PeerId>> {
    self.mesh.find_clique(self.desired_count, self.self_id)
  }

  /// Serializes and sends `GatheringFinished` to every currently-streamed
  /// joiner (not only clique members), closes all heartbeats, and drops
  /// gather streams. Returns the `AddrInfo` of the clique's other members,
  /// for seed negotiation.
  async fn finish(&mut self, clique: Vec<PeerId>) -> Vec<AddrInfo> {
    self.done = true;
    info!(?clique, "facilitator: gathering finished");

    let others: Vec<AddrInfo> =
      clique.iter().filter(|p| **p != self.self_id).filter_map(|p| self.joiners.get(p).map(|j| j.addr.clone())).collect();

    let members: Vec<AddrInfo> =
      others.iter().cloned().chain(std::iter::once(AddrInfo::new(self.self_id, vec![]))).collect();

    for peer in self.joiners.keys() {
      self.gather_sender.send(*peer, GatherMessage::GatheringFinished(members.clone()));
    }

    for (_, joined) in self.joiners.drain() {
      joined.heartbeat.close().await;
      self.gather_sender.disconnect(joined.addr.peer_id);
    }

    others
  }
}

enum Event {
  Connected(AddrInfo),
  Inbound(AddrInfo, GatherMessage),
  Closed(PeerId),
  Heartbeat(HeartbeatEvent),
}

#[allow(clippy::too_many_arguments)]
async fn run(
  mut state: Inner,
  self_contribution: u32,
  mut connected: mpsc::UnboundedReceiver<AddrInfo>,
  mut inbound: mpsc::UnboundedReceiver<(AddrInfo, GatherMessage)>,
  mut closed: mpsc::UnboundedReceiver<PeerId>,
  game_inbound_moves: mpsc::UnboundedReceiver<(PeerId, crate::wire::Direction)>,
  game_closed: mpsc::UnboundedReceiver<PeerId>,
  established_tx: mpsc::UnboundedSender<GameEstablished>,
  mut close_rx: oneshot::Receiver<()>,
  done_tx: oneshot::Sender<()>,
) {
  let (hb_tx, mut hb_rx) = mpsc::unbounded_channel::<HeartbeatEvent>();

  loop {
    let event = tokio::select! {
      _ = &mut close_rx => break,
      msg = connected.recv() => match msg {
        Some(addr) => Event::Connected(addr),
        None => continue,
      },
      msg = inbound.recv() => match msg {
        Some((addr, gm)) => Event::Inbound(addr, gm),
        None => continue,
      },
      peer = closed.recv() => match peer {
        Some(p) => Event::Closed(p),
        None => continue,
      },
      hb = hb_rx.recv() => match hb {
        Some(e) => Event::Heartbeat(e),
        None => continue,
      },
    };

    if state.done {
      // Gathering already concluded: reject further inbound activity
      // rather than let a late joiner mutate a mesh nobody will search
      // again.
      continue;
    }

    let rescan = match event {
      Event::Connected(addr) => {
        state.on_connected(addr, &hb_tx);
        false
      }
      Event::Inbound(addr, msg) => {
        if let Err(e) = msg.validate() {
          warn!(peer = %addr.peer_id, error = %e, "facilitator: malformed gather message");
          false
        } else {
          state.on_message(addr.peer_id, msg)
        }
      }
      Event::Closed(peer) => {
        state.drop_joiner(peer).await;
        false
      }
      Event::Heartbeat(hb_event) => state.on_heartbeat(hb_event).await,
    };

    if !rescan {
      continue;
    }

    if let Some(clique) = state.try_find_clique() {
      let others = state.finish(clique).await;

      let game = GameInstance::negotiate(
        state.self_id,
        self_contribution,
        others,
        state.game_sender.clone(),
        game_inbound_moves,
        game_closed,
      )
      .await;

      let _ = established_tx.send(GameEstablished { facilitator: state.self_id, game });
      break;
    }
  }

  let _ = done_tx.send(());
}
