//! Heartbeat monitor: converts a noisy ping stream into an edge-triggered
//! `{peer, alive}` event stream.

use {
  crate::{error::Error, ping::PingService},
  libp2p::PeerId,
  metrics::increment_counter,
  parking_lot::Mutex,
  std::{sync::Arc, time::Duration},
  tokio::sync::{mpsc, oneshot},
  tracing::debug,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatEvent {
  pub peer: PeerId,
  pub alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
  Unknown,
  Alive,
  Dead,
}

/// One running heartbeat for a single peer. Owns one ping worker task.
pub struct Heartbeat {
  peer: PeerId,
  close_tx: Mutex<Option<oneshot::Sender<()>>>,
  done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Heartbeat {
  /// Spawns the ping worker. Fails if `ping` is absent.
  pub fn new(
    ping: Option<Arc<dyn PingService>>,
    peer: PeerId,
    interval: Duration,
    out: mpsc::UnboundedSender<HeartbeatEvent>,
  ) -> Result<Self, Error> {
    let ping = ping.ok_or(Error::NoPingService)?;

    let (close_tx, close_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(run(ping, peer, interval, out, close_rx, done_tx));

    Ok(Self {
      peer,
      close_tx: Mutex::new(Some(close_tx)),
      done_rx: Mutex::new(Some(done_rx)),
    })
  }

  pub fn peer(&self) -> PeerId {
    self.peer
  }

  /// Cancels any in-flight ping, waits for the worker to finish, and
  /// returns. Idempotent: a second call is a no-op. No event is emitted on
  /// close.
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

async fn run(
  ping: Arc<dyn PingService>,
  peer: PeerId,
  interval: Duration,
  out: mpsc::UnboundedSender<HeartbeatEvent>,
  mut close_rx: oneshot::Receiver<()>,
  done_tx: oneshot::Sender<()>,
) {
  let mut status = Status::Unknown;

  loop {
    let ping_result = tokio::select! {
      _ = &mut close_rx => break,
      result = ping.ping(peer) => result,
    };

    match ping_result {
      Ok(()) if status != Status::Alive => {
        debug!(peer = %peer, "heartbeat: peer now alive");
        increment_counter!("heartbeat_alive", "peer" => peer.to_string());
        // The output channel's lifetime is owned by the consumer, not us:
        // a closed receiver there is not our problem to report.
        let _ = out.send(HeartbeatEvent { peer, alive: true });
        status = Status::Alive;
      }
      Err(_) if status != Status::Dead => {
        debug!(peer = %peer, "heartbeat: peer now dead");
        increment_counter!("heartbeat_dead", "peer" => peer.to_string());
        let _ = out.send(HeartbeatEvent { peer, alive: false });
        status = Status::Dead;
      }
      _ => {}
    }

    tokio::select! {
      _ = &mut close_rx => break,
      _ = tokio::time::sleep(interval) => {}
    }
  }

  let _ = done_tx.send(());
}
