//! Gather-point beacon: periodically publishes a `GatherPointAdvert` on the
//! broadcast bus while open.

use {
  crate::{bus::Bus, wire::GatherPointAdvert},
  parking_lot::Mutex,
  std::{sync::Arc, time::Duration},
  tokio::sync::oneshot,
  tracing::warn,
};

pub struct GatherBeacon {
  close_tx: Mutex<Option<oneshot::Sender<()>>>,
  done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl GatherBeacon {
  /// Starts publishing `advert` every `ttl` (first publish after `ttl`,
  /// not immediately).
  pub fn start(bus: Arc<dyn Bus>, advert: GatherPointAdvert, ttl: Duration) -> Self {
    let (close_tx, close_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(run(bus, advert, ttl, close_rx, done_tx));

    Self { close_tx: Mutex::new(Some(close_tx)), done_rx: Mutex::new(Some(done_rx)) }
  }

  /// Stops the schedule and waits for any in-flight publish to unblock.
  /// Idempotent.
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
  bus: Arc<dyn Bus>,
  advert: GatherPointAdvert,
  ttl: Duration,
  mut close_rx: oneshot::Receiver<()>,
  done_tx: oneshot::Sender<()>,
) {
  loop {
    tokio::select! {
      _ = &mut close_rx => break,
      _ = tokio::time::sleep(ttl) => {}
    }

    let publish = async {
      match rmp_serde::to_vec(&advert) {
        Ok(bytes) => bus.publish(bytes.into()),
        Err(e) => warn!("gather beacon: encode advert: {e}"),
      }
    };

    if tokio::time::timeout(ttl, publish).await.is_err() {
      warn!("gather beacon: publish exceeded ttl, continuing");
    }
  }

  let _ = done_tx.send(());
}

#[cfg(test)]
mod tests {
  use {super::*, crate::bus::MemoryBus, futures::StreamExt};

  #[tokio::test(start_paused = true)]
  async fn publishes_after_ttl_and_reschedules() {
    let topic = MemoryBus::new_topic();
    let facilitator = random_peer();
    let publisher = MemoryBus::for_peer(facilitator, topic.clone());
    let listener = MemoryBus::for_peer(random_peer(), topic);

    let mut rx = listener.subscribe();

    let advert = GatherPointAdvert {
      facilitator: crate::wire::AddrInfo::new(facilitator, vec![]),
      ttl: Duration::from_secs(5),
      desired_count: 3,
      current_count: 0,
    };

    let beacon = GatherBeacon::start(Arc::new(publisher), advert, Duration::from_secs(5));

    let first = rx.next().await.unwrap();
    assert_eq!(first.from, facilitator);

    tokio::time::advance(Duration::from_secs(5)).await;
    let second = rx.next().await.unwrap();
    assert_eq!(second.from, facilitator);

    beacon.close().await;
  }

  fn random_peer() -> libp2p::PeerId {
    libp2p::PeerId::random()
  }
}
