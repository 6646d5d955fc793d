//! Node façade: owns the swarm-backed collaborators, at most one
//! facilitator, and a map of active joiners, and mirrors outcomes onto the
//! two outbound channels a binary actually consumes.
//!
//! A node plays exactly one game at a time. When any facilitator or joiner
//! it started emits `GameEstablished`, every other in-flight gather activity
//! is torn down before the event is forwarded — a second clique finishing
//! after the node has already committed to a game would otherwise hand the
//! caller two `GameEstablished` events for one node.

use {
  crate::{
    bus::{Bus, ReceivedMessage},
    config::Config,
    error::Error,
    gather::{beacon::GatherBeacon, facilitator::Facilitator, joiner::Joiner, GameEstablished},
    ping::PingService,
    transport::Transport,
    wire::{AddrInfo, GatherPointAdvert},
  },
  futures::StreamExt,
  libp2p::PeerId,
  parking_lot::Mutex,
  std::{collections::HashMap, sync::Arc, time::Duration},
  tokio::sync::{mpsc, oneshot},
  tokio_stream::wrappers::UnboundedReceiverStream,
  tracing::{info, warn},
};

/// Advertisement observed on the broadcast bus, already decoded and
/// filtered of self-originated and malformed messages.
pub type GatherPointSighting = GatherPointAdvert;

pub struct Node {
  self_id: PeerId,
  config: Config,
  ping: Arc<dyn PingService>,
  bus: Arc<dyn Bus>,
  transport: Arc<dyn Transport>,
  facilitator: Mutex<Option<(GatherBeacon, Facilitator)>>,
  joiners: Mutex<HashMap<PeerId, Joiner>>,
  established_tx: mpsc::UnboundedSender<GameEstablished>,
  games_rx: Mutex<Option<mpsc::UnboundedReceiver<GameEstablished>>>,
  close_tx: Mutex<Option<oneshot::Sender<()>>>,
  done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Node {
  pub fn new(
    self_id: PeerId,
    config: Config,
    ping: Arc<dyn PingService>,
    bus: Arc<dyn Bus>,
    transport: Arc<dyn Transport>,
  ) -> Arc<Self> {
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (games_tx, games_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    let node = Arc::new(Self {
      self_id,
      config,
      ping,
      bus,
      transport,
      facilitator: Mutex::new(None),
      joiners: Mutex::new(HashMap::new()),
      established_tx: internal_tx,
      games_rx: Mutex::new(Some(games_rx)),
      close_tx: Mutex::new(Some(close_tx)),
      done_rx: Mutex::new(Some(done_rx)),
    });

    tokio::spawn(relay(node.clone(), internal_rx, games_tx, close_rx, done_tx));

    node
  }

  pub fn self_id(&self) -> PeerId {
    self.self_id
  }

  /// Gather-point advertisements seen on the bus, with self-originated and
  /// malformed messages already filtered out.
  pub fn gather_points(&self) -> impl futures::Stream<Item = GatherPointSighting> {
    let self_id = self.self_id;
    UnboundedReceiverStream::new(subscribe_decoded(self.bus.subscribe(), self_id))
  }

  /// The channel of `GameEstablished` outcomes this node participates in.
  /// Can only be taken once; subsequent calls return `None`.
  pub fn established_games(&self) -> Option<mpsc::UnboundedReceiver<GameEstablished>> {
    self.games_rx.lock().take()
  }

  /// Hosts a new gather point. Fails if this node is already facilitating
  /// one.
  pub fn create_gather_point(&self, desired_count: u32, ttl: Duration) -> Result<(), Error> {
    let mut facilitator_slot = self.facilitator.lock();
    if facilitator_slot.is_some() {
      return Err(Error::AlreadyFacilitating);
    }

    let gather = self.transport.gather_endpoint();
    let game = self.transport.game_endpoint();

    let facilitator = Facilitator::start(
      self.self_id,
      desired_count,
      self.config.heartbeat_interval,
      self.ping.clone(),
      gather,
      game,
      self.established_tx.clone(),
    );

    let advert = GatherPointAdvert {
      facilitator: AddrInfo::new(self.self_id, vec![]),
      ttl,
      desired_count,
      current_count: 0,
    };
    let beacon = GatherBeacon::start(self.bus.clone(), advert, ttl);

    *facilitator_slot = Some((beacon, facilitator));
    Ok(())
  }

  /// Joins a gather point hosted by `addr_info.peer_id`. Fails if this node
  /// has already joined that facilitator, or if the initial dial fails.
  pub async fn join_gather_point(&self, addr_info: AddrInfo) -> Result<(), Error> {
    if self.joiners.lock().contains_key(&addr_info.peer_id) {
      return Err(Error::AlreadyJoined);
    }

    self.transport.dial(addr_info.clone()).await.map_err(Error::Dial)?;

    let gather = self.transport.gather_endpoint();
    let game = self.transport.game_endpoint();

    let joiner = Joiner::start(
      self.self_id,
      addr_info.peer_id,
      self.config.heartbeat_interval,
      self.ping.clone(),
      gather,
      game,
      self.established_tx.clone(),
    );

    self.joiners.lock().insert(addr_info.peer_id, joiner);
    Ok(())
  }

  /// Tears down every facilitator and joiner this node currently runs,
  /// without forwarding anything on `established_games()`.
  async fn teardown_all(&self) {
    let facilitator = self.facilitator.lock().take();
    if let Some((beacon, facilitator)) = facilitator {
      beacon.close().await;
      facilitator.close().await;
    }

    let joiners: Vec<Joiner> = self.joiners.lock().drain().map(|(_, j)| j).collect();
    for joiner in joiners {
      joiner.close().await;
    }
  }

  /// Signals the relay task, waits for it to drain, and tears down any
  /// remaining gather activity. Idempotent.
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

    self.teardown_all().await;
  }
}

fn subscribe_decoded(
  mut stream: futures::stream::BoxStream<'static, ReceivedMessage>,
  self_id: PeerId,
) -> mpsc::UnboundedReceiver<GatherPointSighting> {
  let (tx, rx) = mpsc::unbounded_channel();

  tokio::spawn(async move {
    while let Some(msg) = stream.next().await {
      if msg.from == self_id {
        continue;
      }

      match rmp_serde::from_slice::<GatherPointAdvert>(&msg.data) {
        Ok(advert) => {
          if tx.send(advert).is_err() {
            break;
          }
        }
        Err(e) => warn!(peer = %msg.from, error = %e, "node: malformed gather point advert, dropping"),
      }
    }
  });

  rx
}

/// Forwards every `GameEstablished` this node's components produce to the
/// node's own outbound channel, tearing down all other gather activity
/// first so the node commits to exactly one game.
async fn relay(
  node: Arc<Node>,
  mut internal_rx: mpsc::UnboundedReceiver<GameEstablished>,
  games_tx: mpsc::UnboundedSender<GameEstablished>,
  mut close_rx: oneshot::Receiver<()>,
  done_tx: oneshot::Sender<()>,
) {
  loop {
    let established = tokio::select! {
      _ = &mut close_rx => break,
      msg = internal_rx.recv() => match msg {
        Some(e) => e,
        None => break,
      },
    };

    info!(facilitator = %established.facilitator, "node: game established, tearing down other gather activity");
    node.teardown_all().await;

    let _ = games_tx.send(established);
  }

  let _ = done_tx.send(());
}
