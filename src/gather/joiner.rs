//! Gather joiner: the per-facilitator peer-side counterpart. Opens a gather
//! stream to one facilitator, connects to whichever peers it is told to via
//! `ConnectionRequest`, and reports its own connections back.
//!
//! The facilitator's own liveness is not separately pinged: its gather
//! stream ending is already the signal the joiner needs (see the last
//! bullet of the behaviour list this module implements), so only
//! peer-to-peer heartbeats (one per `ConnectionRequest` target) are spawned
//! here.

use {
  crate::{
    gather::GameEstablished,
    game::GameInstance,
    heartbeat::{Heartbeat, HeartbeatEvent},
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

pub struct Joiner {
  close_tx: Mutex<Option<oneshot::Sender<()>>>,
  done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Joiner {
  #[allow(clippy::too_many_arguments)]
  pub fn start(
    self_id: PeerId,
    facilitator: PeerId,
    heartbeat_interval: Duration,
    ping: Arc<dyn PingService>,
    gather: GatherEndpoint,
    game: GameEndpoint,
    established_tx: mpsc::UnboundedSender<GameEstablished>,
  ) -> Self {
    // Rendezvous tickle: forces the facilitator's inbound handler to fire
    // even though this joiner has nothing to say yet.
    gather.sender.tickle(facilitator);

    let self_contribution = game.self_contribution;

    let (close_tx, close_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    let state = Inner {
      self_id,
      facilitator,
      heartbeat_interval,
      ping,
      gather_sender: gather.sender,
      game_sender: game.sender,
      peers: HashMap::new(),
    };

    tokio::spawn(run(
      state,
      self_contribution,
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

  /// Symmetric with `Facilitator::close`. Idempotent.
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

struct PeerHandle {
  addr: AddrInfo,
  heartbeat: Heartbeat,
}

struct Inner {
  self_id: PeerId,
  facilitator: PeerId,
  heartbeat_interval: Duration,
  ping: Arc<dyn PingService>,
  gather_sender: Arc<dyn GatherSender>,
  game_sender: Arc<dyn GameSender>,
  peers: HashMap<PeerId, PeerHandle>,
}

impl Inner {
  /// `ConnectionRequest[x]`: dial x, spawn a heartbeat, store it.
  /// Idempotent for a given x.
  async fn on_connection_request(&mut self, targets: Vec<AddrInfo>, hb_tx: &mpsc::UnboundedSender<HeartbeatEvent>) {
    for addr in targets {
      if self.peers.contains_key(&addr.peer_id) {
        continue;
      }

      if let Err(e) = self.game_sender.dial(addr.clone()).await {
        warn!(peer = %addr.peer_id, error = %e, "joiner: dial requested peer failed");
        continue;
      }

      match Heartbeat::new(Some(self.ping.clone()), addr.peer_id, self.heartbeat_interval, hb_tx.clone()) {
        Ok(heartbeat) => {
          self.peers.insert(addr.peer_id, PeerHandle { addr, heartbeat });
        }
        Err(e) => warn!(peer = %addr.peer_id, error = %e, "joiner: cannot heartbeat requested peer"),
      }
    }
  }

  async fn on_heartbeat(&mut self, event: HeartbeatEvent) {
    let Some(peer) = self.peers.get(&event.peer) else {
      return;
    };
    let addr = peer.addr.clone();

    if event.alive {
      info!(peer = %event.peer, "joiner: connected to requested peer");
      self.gather_sender.send(self.facilitator, GatherMessage::Connected(vec![addr]));
    } else {
      self.game_sender.disconnect(event.peer);
      self.gather_sender.send(self.facilitator, GatherMessage::Disconnected(vec![addr]));
    }
  }

  /// Closes all per-peer heartbeats, e.g. on gathering-finished or on the
  /// facilitator stream ending unexpectedly.
  async fn close_all_heartbeats(&mut self) {
    for (_, peer) in self.peers.drain() {
      peer.heartbeat.close().await;
    }
  }
}

enum Event {
  Inbound(AddrInfo, GatherMessage),
  FacilitatorClosed,
  Heartbeat(HeartbeatEvent),
}

#[allow(clippy::too_many_arguments)]
async fn run(
  mut state: Inner,
  self_contribution: u32,
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
      msg = inbound.recv() => match msg {
        Some((addr, gm)) => Event::Inbound(addr, gm),
        None => Event::FacilitatorClosed,
      },
      peer = closed.recv() => match peer {
        Some(p) if p == state.facilitator => Event::FacilitatorClosed,
        Some(_) => continue,
        None => continue,
      },
      hb = hb_rx.recv() => match hb {
        Some(e) => Event::Heartbeat(e),
        None => continue,
      },
    };

    match event {
      Event::Inbound(_from, msg) => {
        if let Err(e) = msg.validate() {
          warn!(error = %e, "joiner: malformed gather message from facilitator");
          continue;
        }

        match msg {
          GatherMessage::ConnectionRequest(targets) => {
            state.on_connection_request(targets, &hb_tx).await;
          }
          GatherMessage::GatheringFinished(members) => {
            state.close_all_heartbeats().await;
            state.gather_sender.disconnect(state.facilitator);

            let selected = members.iter().any(|m| m.peer_id == state.self_id);
            if !selected {
              info!("joiner: gathering finished without this peer, terminating quietly");
              break;
            }

            let others: Vec<AddrInfo> = members.into_iter().filter(|m| m.peer_id != state.self_id).collect();
            let game = GameInstance::negotiate(
              state.self_id,
              self_contribution,
              others,
              state.game_sender.clone(),
              game_inbound_moves,
              game_closed,
            )
            .await;

            let _ = established_tx.send(GameEstablished { facilitator: state.facilitator, game });
            break;
          }
          other => {
            warn!(?other, "joiner: unexpected tag from facilitator, ignoring");
          }
        }
      }
      Event::FacilitatorClosed => {
        info!("joiner: facilitator stream ended unexpectedly, terminating quietly");
        state.close_all_heartbeats().await;
        break;
      }
      Event::Heartbeat(hb_event) => {
        state.on_heartbeat(hb_event).await;
      }
    }
  }

  let _ = done_tx.send(());
}
