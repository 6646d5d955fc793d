//! Broadcast bus collaborator: the gather beacon publishes advertisements
//! here, joiners subscribe. Deliberately a black box — production sits on
//! `libp2p::gossipsub` (`libp2p_backend.rs`), tests substitute the
//! in-memory fan-out below.

use {
  bytes::Bytes,
  futures::stream::BoxStream,
  libp2p::PeerId,
  parking_lot::Mutex,
  std::sync::Arc,
  tokio::sync::mpsc,
  tokio_stream::wrappers::UnboundedReceiverStream,
};

#[derive(Clone, Debug)]
pub struct ReceivedMessage {
  pub from: PeerId,
  pub data: Bytes,
}

pub trait Bus: Send + Sync {
  fn publish(&self, bytes: Bytes);
  fn subscribe(&self) -> BoxStream<'static, ReceivedMessage>;
}

/// In-memory fan-out used by tests and by single-process demos. Every
/// subscriber receives every publish from every participant sharing the
/// same `MemoryBus`, tagged with the publisher's peer id.
#[derive(Clone)]
pub struct MemoryBus {
  self_id: PeerId,
  subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ReceivedMessage>>>>,
}

impl MemoryBus {
  /// Creates a fresh, empty bus topic shared by every peer that clones the
  /// returned handle bound to its own id via [`MemoryBus::for_peer`].
  pub fn new_topic() -> Arc<Mutex<Vec<mpsc::UnboundedSender<ReceivedMessage>>>> {
    Arc::new(Mutex::new(Vec::new()))
  }

  pub fn for_peer(
    self_id: PeerId,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ReceivedMessage>>>>,
  ) -> Self {
    Self { self_id, subscribers }
  }
}

impl Bus for MemoryBus {
  fn publish(&self, bytes: Bytes) {
    let msg = ReceivedMessage { from: self.self_id, data: bytes };
    self.subscribers.lock().retain(|tx| tx.send(msg.clone()).is_ok());
  }

  fn subscribe(&self) -> BoxStream<'static, ReceivedMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    self.subscribers.lock().push(tx);
    Box::pin(UnboundedReceiverStream::new(rx))
  }
}

#[cfg(test)]
mod tests {
  use {super::*, futures::StreamExt};

  #[tokio::test]
  async fn publish_reaches_other_subscribers() {
    let topic = MemoryBus::new_topic();
    let a = MemoryBus::for_peer(PeerId::random(), topic.clone());
    let b = MemoryBus::for_peer(PeerId::random(), topic.clone());

    let mut b_sub = b.subscribe();
    a.publish(Bytes::from_static(b"hello"));

    let received = b_sub.next().await.unwrap();
    assert_eq!(received.data, Bytes::from_static(b"hello"));
  }
}
