//! Production collaborators realized on a real libp2p swarm: `PingService`
//! over `libp2p::ping`, `Bus` over `libp2p::gossipsub`, and
//! `GatherSender`/`GameSender`/`Transport` over one
//! `libp2p::request_response::RequestResponse` per protocol, each framed
//! with the MessagePack codec from `codec.rs`.
//!
//! Everything downstream of the swarm is driven by one task (`run`) reading
//! both a command channel and the swarm's own event stream — mirroring the
//! teacher's single `cmdtx`-driven task per `Topic`, generalized here to the
//! whole node rather than one gossip overlay.
//!
//! Scope note: `gather_endpoint()`/`game_endpoint()` each replace whatever
//! sink was previously registered, so only the most recently minted
//! endpoint of each kind receives inbound traffic. This mirrors
//! `testsupport::MemoryTransport`'s own one-role-at-a-time limitation and is
//! sufficient for a node that hosts at most one facilitator and joins one
//! gather point at a time; a node joining several gather points
//! concurrently would need the routing table keyed by which relationship a
//! peer belongs to, not just by kind.

use {
  crate::{
    bus::{Bus, ReceivedMessage},
    codec::MessagePackCodec,
    config::{Config, GATHER_PROTOCOL_ID, GAME_PROTOCOL_ID},
    error::PeerFault,
    ping::{LibP2pPing, PingFailure, PingService},
    router::PendingReplies,
    transport::{GameEndpoint, GameSender, GatherEndpoint, GatherSender, Transport},
    wire::{AddrInfo, Direction, GameRequest, GameResponse, GatherAck, GatherMessage},
  },
  asynchronous_codec::Framed,
  bytes::Bytes,
  futures::{future::BoxFuture, AsyncRead, AsyncWrite, SinkExt, StreamExt},
  libp2p::{
    core::{upgrade, ProtocolName},
    gossipsub,
    identity::Keypair,
    noise,
    ping,
    request_response::{
      ProtocolSupport, RequestId, RequestResponse, RequestResponseConfig, RequestResponseEvent,
      RequestResponseMessage,
    },
    swarm::{NetworkBehaviour, SwarmBuilder, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Swarm, Transport as _,
  },
  parking_lot::Mutex,
  std::{collections::HashMap, io, marker::PhantomData, sync::Arc, time::Duration},
  tokio::sync::{mpsc, oneshot},
  tracing::{debug, warn},
};

// -- wire protocol plumbing -------------------------------------------------

#[derive(Clone, Debug, Default)]
struct GatherProtocol;

impl ProtocolName for GatherProtocol {
  fn protocol_name(&self) -> &[u8] {
    GATHER_PROTOCOL_ID.as_bytes()
  }
}

#[derive(Clone, Debug, Default)]
struct GameProtocol;

impl ProtocolName for GameProtocol {
  fn protocol_name(&self) -> &[u8] {
    GAME_PROTOCOL_ID.as_bytes()
  }
}

/// Zero-length tickle vs. an actual application-level `GatherMessage` — the
/// request/response counterpart of the raw-stream empty frame `codec.rs`
/// swallows, expressed at the type level since a request/response exchange
/// always carries a typed value rather than a possibly-empty byte string.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
enum GatherRequest {
  Tickle,
  Message(GatherMessage),
}

/// Bridges a `(Request, Response)` pair between libp2p's request/response
/// codec trait and the MessagePack `Framed` codec already used for the
/// gather beacon's broadcast payload, so both protocols share one framing
/// implementation.
#[derive(Clone, Default)]
struct RecordCodec<Proto, Req, Resp> {
  _marker: PhantomData<(Proto, Req, Resp)>,
}

#[async_trait::async_trait]
impl<Proto, Req, Resp> libp2p::request_response::RequestResponseCodec for RecordCodec<Proto, Req, Resp>
where
  Proto: ProtocolName + Clone + Send + Sync,
  Req: serde::Serialize + serde::de::DeserializeOwned + Send,
  Resp: serde::Serialize + serde::de::DeserializeOwned + Send,
{
  type Protocol = Proto;
  type Request = Req;
  type Response = Resp;

  async fn read_request<T>(&mut self, _: &Self::Protocol, io: &mut T) -> io::Result<Req>
  where
    T: AsyncRead + Unpin + Send,
  {
    read_record(io).await
  }

  async fn read_response<T>(&mut self, _: &Self::Protocol, io: &mut T) -> io::Result<Resp>
  where
    T: AsyncRead + Unpin + Send,
  {
    read_record(io).await
  }

  async fn write_request<T>(&mut self, _: &Self::Protocol, io: &mut T, req: Req) -> io::Result<()>
  where
    T: AsyncWrite + Unpin + Send,
  {
    write_record(io, req).await
  }

  async fn write_response<T>(&mut self, _: &Self::Protocol, io: &mut T, resp: Resp) -> io::Result<()>
  where
    T: AsyncWrite + Unpin + Send,
  {
    write_record(io, resp).await
  }
}

async fn read_record<T, V>(io: &mut T) -> io::Result<V>
where
  T: AsyncRead + Unpin + Send,
  V: serde::de::DeserializeOwned,
{
  let mut framed = Framed::new(io, MessagePackCodec::<V>::default());
  framed
    .next()
    .await
    .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed before a frame arrived"))?
}

async fn write_record<T, V>(io: &mut T, value: V) -> io::Result<()>
where
  T: AsyncWrite + Unpin + Send,
  V: serde::Serialize,
{
  let mut framed = Framed::new(io, MessagePackCodec::<V>::default());
  framed.send(value).await
}

type GatherCodec = RecordCodec<GatherProtocol, GatherRequest, GatherAck>;
type GameCodec = RecordCodec<GameProtocol, GameRequest, GameResponse>;

// -- combined behaviour ------------------------------------------------------

#[derive(NetworkBehaviour)]
#[behaviour(out_event = "ComposedEvent", event_process = false)]
struct Behaviour {
  ping: ping::Behaviour,
  gossipsub: gossipsub::Behaviour,
  gather: RequestResponse<GatherCodec>,
  game: RequestResponse<GameCodec>,
}

#[derive(Debug)]
enum ComposedEvent {
  Ping(ping::Event),
  Gossipsub(gossipsub::Event),
  Gather(RequestResponseEvent<GatherRequest, GatherAck>),
  Game(RequestResponseEvent<GameRequest, GameResponse>),
}

impl From<ping::Event> for ComposedEvent {
  fn from(e: ping::Event) -> Self {
    ComposedEvent::Ping(e)
  }
}

impl From<gossipsub::Event> for ComposedEvent {
  fn from(e: gossipsub::Event) -> Self {
    ComposedEvent::Gossipsub(e)
  }
}

impl From<RequestResponseEvent<GatherRequest, GatherAck>> for ComposedEvent {
  fn from(e: RequestResponseEvent<GatherRequest, GatherAck>) -> Self {
    ComposedEvent::Gather(e)
  }
}

impl From<RequestResponseEvent<GameRequest, GameResponse>> for ComposedEvent {
  fn from(e: RequestResponseEvent<GameRequest, GameResponse>) -> Self {
    ComposedEvent::Game(e)
  }
}

// -- routing between the swarm task and the collaborator facades -----------

struct GatherSink {
  connected: mpsc::UnboundedSender<AddrInfo>,
  inbound: mpsc::UnboundedSender<(AddrInfo, GatherMessage)>,
  closed: mpsc::UnboundedSender<PeerId>,
}

struct GameSink {
  inbound_moves: mpsc::UnboundedSender<(PeerId, Direction)>,
  closed: mpsc::UnboundedSender<PeerId>,
  /// This node's own stable seed contribution for the currently-registered
  /// game endpoint, answered back verbatim to every inbound `SeedOffer` so
  /// every peer negotiating with this node folds in the same value this
  /// node itself uses.
  self_contribution: u32,
}

#[derive(Default)]
struct Routes {
  gather: Mutex<Option<GatherSink>>,
  game: Mutex<Option<GameSink>>,
}

enum Command {
  Dial(AddrInfo),
  PublishGossip(Bytes),
  SendGatherMessage { peer: PeerId, msg: GatherMessage },
  SendGatherTickle { peer: PeerId },
  SendSeedOffer { peer: PeerId, r_self: u32, reply: oneshot::Sender<Result<u32, PeerFault>> },
  SendMove { peer: PeerId, dir: Direction },
  Disconnect { peer: PeerId },
}

/// Handle shared by every production collaborator: issues commands to the
/// single swarm-driving task.
#[derive(Clone)]
struct Handle {
  commands: mpsc::UnboundedSender<Command>,
}

// -- Bus -----------------------------------------------------------------

struct LibP2pBus {
  handle: Handle,
  subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ReceivedMessage>>>>,
}

impl Bus for LibP2pBus {
  fn publish(&self, bytes: Bytes) {
    let _ = self.handle.commands.send(Command::PublishGossip(bytes));
  }

  fn subscribe(&self) -> futures::stream::BoxStream<'static, ReceivedMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    self.subscribers.lock().push(tx);
    Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
  }
}

// -- GatherSender / GameSender -------------------------------------------

struct LibP2pGatherSender {
  handle: Handle,
}

impl GatherSender for LibP2pGatherSender {
  fn dial(&self, info: AddrInfo) -> BoxFuture<'static, Result<(), PeerFault>> {
    let _ = self.handle.commands.send(Command::Dial(info));
    Box::pin(async { Ok(()) })
  }

  fn send(&self, peer: PeerId, msg: GatherMessage) {
    let _ = self.handle.commands.send(Command::SendGatherMessage { peer, msg });
  }

  fn tickle(&self, peer: PeerId) {
    let _ = self.handle.commands.send(Command::SendGatherTickle { peer });
  }

  fn disconnect(&self, peer: PeerId) {
    let _ = self.handle.commands.send(Command::Disconnect { peer });
  }
}

struct LibP2pGameSender {
  handle: Handle,
}

impl GameSender for LibP2pGameSender {
  fn dial(&self, info: AddrInfo) -> BoxFuture<'static, Result<(), PeerFault>> {
    let _ = self.handle.commands.send(Command::Dial(info));
    Box::pin(async { Ok(()) })
  }

  fn negotiate_seed(&self, peer: PeerId, r_self: u32) -> BoxFuture<'static, Result<u32, PeerFault>> {
    let (reply, reply_rx) = oneshot::channel();
    let sent = self.handle.commands.send(Command::SendSeedOffer { peer, r_self, reply });
    Box::pin(async move {
      if sent.is_err() {
        return Err(PeerFault::StreamClosed);
      }
      reply_rx.await.unwrap_or(Err(PeerFault::StreamClosed))
    })
  }

  fn send_move(&self, peer: PeerId, dir: Direction) {
    let _ = self.handle.commands.send(Command::SendMove { peer, dir });
  }

  fn disconnect(&self, peer: PeerId) {
    let _ = self.handle.commands.send(Command::Disconnect { peer });
  }
}

// -- Transport ------------------------------------------------------------

struct LibP2pTransport {
  handle: Handle,
  gather_sender: Arc<dyn GatherSender>,
  game_sender: Arc<dyn GameSender>,
  routes: Arc<Routes>,
}

impl Transport for LibP2pTransport {
  fn gather_endpoint(&self) -> GatherEndpoint {
    let (connected_tx, connected) = mpsc::unbounded_channel();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (closed_tx, closed) = mpsc::unbounded_channel();

    *self.routes.gather.lock() =
      Some(GatherSink { connected: connected_tx, inbound: inbound_tx, closed: closed_tx });

    GatherEndpoint { sender: self.gather_sender.clone(), connected, inbound, closed }
  }

  fn game_endpoint(&self) -> GameEndpoint {
    let (inbound_tx, inbound_moves) = mpsc::unbounded_channel();
    let (closed_tx, closed) = mpsc::unbounded_channel();
    let self_contribution: u32 = rand::random();

    *self.routes.game.lock() =
      Some(GameSink { inbound_moves: inbound_tx, closed: closed_tx, self_contribution });

    GameEndpoint { sender: self.game_sender.clone(), inbound_moves, closed, self_contribution }
  }

  fn dial(&self, addr: AddrInfo) -> BoxFuture<'static, io::Result<()>> {
    let commands = self.handle.commands.clone();
    Box::pin(async move {
      commands
        .send(Command::Dial(addr))
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "swarm task is gone"))
    })
  }
}

// -- bootstrap + swarm driver ---------------------------------------------

const GATHER_GOSSIP_TOPIC: &str = "/snake/gather-points/0.1.0";

/// Builds the libp2p transport, behaviour, and swarm; spawns the single
/// task that drives it; returns the collaborator facades `Node::new` needs.
pub async fn bootstrap(
  keypair: Keypair,
  listen_addr: Multiaddr,
) -> io::Result<(PeerId, Arc<dyn PingService>, Arc<dyn Bus>, Arc<dyn Transport>)> {
  let local_peer_id = PeerId::from(keypair.public());

  let transport = tcp::tokio::Transport::default()
    .upgrade(upgrade::Version::V1)
    .authenticate(noise::NoiseAuthenticated::xx(&keypair).map_err(io::Error::other)?)
    .multiplex(yamux::YamuxConfig::default())
    .boxed();

  let gossipsub = gossipsub::Behaviour::new(
    gossipsub::MessageAuthenticity::Signed(keypair.clone()),
    gossipsub::ConfigBuilder::default()
      .build()
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
  )
  .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

  let rr_config = RequestResponseConfig::default();
  let behaviour = Behaviour {
    ping: ping::Behaviour::new(ping::Config::new()),
    gossipsub,
    gather: RequestResponse::new(
      GatherCodec::default(),
      std::iter::once((GatherProtocol, ProtocolSupport::Full)),
      rr_config.clone(),
    ),
    game: RequestResponse::new(
      GameCodec::default(),
      std::iter::once((GameProtocol, ProtocolSupport::Full)),
      rr_config,
    ),
  };

  let mut swarm = SwarmBuilder::with_tokio_executor(transport, behaviour, local_peer_id).build();
  swarm
    .listen_on(listen_addr)
    .map_err(|e| io::Error::new(io::ErrorKind::AddrNotAvailable, e))?;

  let topic = gossipsub::IdentTopic::new(GATHER_GOSSIP_TOPIC);
  swarm
    .behaviour_mut()
    .gossipsub
    .subscribe(&topic)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{e:?}")))?;

  let (commands_tx, commands_rx) = mpsc::unbounded_channel();
  let handle = Handle { commands: commands_tx };
  let ping_router = PendingReplies::default();
  let routes = Arc::new(Routes::default());
  let bus_subscribers = Arc::new(Mutex::new(Vec::new()));

  tokio::spawn(run(
    swarm,
    topic,
    commands_rx,
    ping_router.clone(),
    routes.clone(),
    bus_subscribers.clone(),
  ));

  let gather_sender: Arc<dyn GatherSender> = Arc::new(LibP2pGatherSender { handle: handle.clone() });
  let game_sender: Arc<dyn GameSender> = Arc::new(LibP2pGameSender { handle: handle.clone() });

  let ping: Arc<dyn PingService> = Arc::new(LibP2pPing::new(ping_router));
  let bus: Arc<dyn Bus> = Arc::new(LibP2pBus { handle: handle.clone(), subscribers: bus_subscribers });
  let transport: Arc<dyn Transport> =
    Arc::new(LibP2pTransport { handle, gather_sender, game_sender, routes });

  Ok((local_peer_id, ping, bus, transport))
}

async fn run(
  mut swarm: Swarm<Behaviour>,
  topic: gossipsub::IdentTopic,
  mut commands: mpsc::UnboundedReceiver<Command>,
  ping_router: PendingReplies<Result<(), PingFailure>>,
  routes: Arc<Routes>,
  bus_subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ReceivedMessage>>>>,
) {
  let mut pending_seeds: HashMap<RequestId, oneshot::Sender<Result<u32, PeerFault>>> = HashMap::new();

  loop {
    tokio::select! {
      cmd = commands.recv() => {
        let Some(cmd) = cmd else { break };
        handle_command(&mut swarm, &topic, cmd, &mut pending_seeds);
      }
      event = swarm.select_next_some() => {
        handle_swarm_event(&mut swarm, event, &ping_router, &routes, &bus_subscribers, &mut pending_seeds);
      }
    }
  }
}

fn handle_command(
  swarm: &mut Swarm<Behaviour>,
  topic: &gossipsub::IdentTopic,
  cmd: Command,
  pending_seeds: &mut HashMap<RequestId, oneshot::Sender<Result<u32, PeerFault>>>,
) {
  match cmd {
    Command::Dial(addr) => {
      for a in addr.addresses {
        if let Err(e) = swarm.dial(a.clone()) {
          warn!(peer = %addr.peer_id, addr = %a, error = %e, "libp2p: dial failed");
        }
      }
    }
    Command::PublishGossip(bytes) => {
      if let Err(e) = swarm.behaviour_mut().gossipsub.publish(topic.clone(), bytes.to_vec()) {
        warn!(error = %e, "libp2p: gossip publish failed");
      }
    }
    Command::SendGatherMessage { peer, msg } => {
      swarm.behaviour_mut().gather.send_request(&peer, GatherRequest::Message(msg));
    }
    Command::SendGatherTickle { peer } => {
      swarm.behaviour_mut().gather.send_request(&peer, GatherRequest::Tickle);
    }
    Command::SendSeedOffer { peer, r_self, reply } => {
      let id = swarm.behaviour_mut().game.send_request(&peer, GameRequest::SeedOffer(r_self));
      pending_seeds.insert(id, reply);
    }
    Command::SendMove { peer, dir } => {
      swarm.behaviour_mut().game.send_request(&peer, GameRequest::Move(dir));
    }
    Command::Disconnect { peer } => {
      let _ = swarm.disconnect_peer_id(peer);
    }
  }
}

fn handle_swarm_event(
  swarm: &mut Swarm<Behaviour>,
  event: SwarmEvent<ComposedEvent, impl std::error::Error>,
  ping_router: &PendingReplies<Result<(), PingFailure>>,
  routes: &Arc<Routes>,
  bus_subscribers: &Arc<Mutex<Vec<mpsc::UnboundedSender<ReceivedMessage>>>>,
  pending_seeds: &mut HashMap<RequestId, oneshot::Sender<Result<u32, PeerFault>>>,
) {
  match event {
    SwarmEvent::Behaviour(ComposedEvent::Ping(ping::Event { peer, result, .. })) => {
      let mapped = result.map(|_| ()).map_err(|_| PingFailure);
      ping_router.fulfill(peer, mapped);
    }
    SwarmEvent::Behaviour(ComposedEvent::Gossipsub(gossipsub::Event::Message {
      propagation_source,
      message,
      ..
    })) => {
      let received = ReceivedMessage { from: propagation_source, data: message.data.into() };
      bus_subscribers.lock().retain(|tx| tx.send(received.clone()).is_ok());
    }
    SwarmEvent::Behaviour(ComposedEvent::Gather(RequestResponseEvent::Message { peer, message })) => match message {
      RequestResponseMessage::Request { request, channel, .. } => {
        match request {
          GatherRequest::Tickle => {
            if let Some(sink) = routes.gather.lock().as_ref() {
              let _ = sink.connected.send(AddrInfo::new(peer, vec![]));
            }
          }
          GatherRequest::Message(msg) => {
            if let Some(sink) = routes.gather.lock().as_ref() {
              let _ = sink.inbound.send((AddrInfo::new(peer, vec![]), msg));
            }
          }
        }
        let _ = swarm.behaviour_mut().gather.send_response(channel, GatherAck);
      }
      RequestResponseMessage::Response { .. } => {
        debug!(peer = %peer, "libp2p: gather ack received");
      }
    },
    SwarmEvent::Behaviour(ComposedEvent::Gather(RequestResponseEvent::OutboundFailure { peer, .. })) => {
      if let Some(sink) = routes.gather.lock().as_ref() {
        let _ = sink.closed.send(peer);
      }
    }
    SwarmEvent::Behaviour(ComposedEvent::Game(RequestResponseEvent::Message { peer, message })) => match message {
      RequestResponseMessage::Request { request, channel, .. } => {
        let response = match request {
          GameRequest::Move(dir) => {
            if let Some(sink) = routes.game.lock().as_ref() {
              let _ = sink.inbound_moves.send((peer, dir));
            }
            Some(GameResponse::Ack)
          }
          GameRequest::SeedOffer(_) => match routes.game.lock().as_ref() {
            Some(sink) => Some(GameResponse::SeedAck(sink.self_contribution)),
            None => {
              warn!(peer = %peer, "libp2p: seed offer with no game endpoint registered, dropping");
              None
            }
          },
        };
        if let Some(response) = response {
          let _ = swarm.behaviour_mut().game.send_response(channel, response);
        }
      }
      RequestResponseMessage::Response { request_id, response } => {
        if let Some(reply) = pending_seeds.remove(&request_id) {
          let result = match response {
            GameResponse::SeedAck(contribution) => Ok(contribution),
            GameResponse::Ack => Err(PeerFault::ProtocolViolation("expected SeedAck, got Ack".into())),
          };
          let _ = reply.send(result);
        }
      }
    },
    SwarmEvent::Behaviour(ComposedEvent::Game(RequestResponseEvent::OutboundFailure { peer, request_id, .. })) => {
      if let Some(reply) = pending_seeds.remove(&request_id) {
        let _ = reply.send(Err(PeerFault::StreamClosed));
      }
      if let Some(sink) = routes.game.lock().as_ref() {
        let _ = sink.closed.send(peer);
      }
    }
    SwarmEvent::ConnectionClosed { peer_id, .. } => {
      if let Some(sink) = routes.gather.lock().as_ref() {
        let _ = sink.closed.send(peer_id);
      }
      if let Some(sink) = routes.game.lock().as_ref() {
        let _ = sink.closed.send(peer_id);
      }
    }
    _ => {}
  }
}
