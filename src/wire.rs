//! Self-describing wire records for the gather and game planes.
//!
//! `GatherPointAdvert` travels on the broadcast bus; `GatherMessage` travels
//! on a gather stream. Both are encoded with `rmp-serde` (MessagePack).

use {
  libp2p::{Multiaddr, PeerId},
  serde::{Deserialize, Serialize},
  std::time::Duration,
};

/// PeerId plus enough addresses to dial it. Opaque beyond that.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrInfo {
  pub peer_id: PeerId,
  pub addresses: Vec<Multiaddr>,
}

impl AddrInfo {
  pub fn new(peer_id: PeerId, addresses: Vec<Multiaddr>) -> Self {
    Self { peer_id, addresses }
  }
}

/// Broadcast payload advertising a gather point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherPointAdvert {
  pub facilitator: AddrInfo,
  pub ttl: Duration,
  pub desired_count: u32,
  pub current_count: u32,
}

/// Tag of a `GatherMessage`. `Connected`/`Disconnected` carry exactly one
/// address, `ConnectionRequest` carries exactly one, `GatheringFinished`
/// carries the whole chosen set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatherMessage {
  /// Ask the receiving joiner to dial `0`.
  ConnectionRequest(Vec<AddrInfo>),
  /// Report that the sender is now connected to `0`.
  Connected(Vec<AddrInfo>),
  /// Report that the sender has lost its connection to `0`.
  Disconnected(Vec<AddrInfo>),
  /// The gathering concluded; `0` is the full chosen clique.
  GatheringFinished(Vec<AddrInfo>),
}

impl GatherMessage {
  /// Protocol violation check: the tags that require exactly one address
  /// element reject an empty or oversized list.
  pub fn validate(&self) -> Result<(), String> {
    let len = match self {
      GatherMessage::ConnectionRequest(v) => v.len(),
      GatherMessage::Connected(v) => v.len(),
      GatherMessage::Disconnected(v) => v.len(),
      GatherMessage::GatheringFinished(v) => {
        if v.is_empty() {
          return Err("GatheringFinished with empty member list".into());
        }
        return Ok(());
      }
    };

    if len != 1 {
      return Err(format!("expected exactly one address, got {len}"));
    }

    Ok(())
  }
}

/// Direction of a single player move. Encoded on the game stream as a
/// single decimal digit followed by a newline: 0=Up, 1=Right, 2=Down,
/// 3=Left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
  Up,
  Right,
  Down,
  Left,
}

impl Direction {
  pub fn to_wire(self) -> u8 {
    match self {
      Direction::Up => 0,
      Direction::Right => 1,
      Direction::Down => 2,
      Direction::Left => 3,
    }
  }

  pub fn from_wire(b: u8) -> Option<Self> {
    match b {
      0 => Some(Direction::Up),
      1 => Some(Direction::Right),
      2 => Some(Direction::Down),
      3 => Some(Direction::Left),
      _ => None,
    }
  }
}

/// Request payload for the game request/response protocol: either side of
/// the seed exchange, or a submitted move for the current turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameRequest {
  SeedOffer(u32),
  Move(Direction),
}

/// Response payload for the game request/response protocol: the answering
/// peer's own seed contribution, or a trivial move acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResponse {
  SeedAck(u32),
  Ack,
}

/// Trivial acknowledgement for a `GatherMessage` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherAck;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn direction_roundtrip() {
    for d in [Direction::Up, Direction::Right, Direction::Down, Direction::Left] {
      assert_eq!(Direction::from_wire(d.to_wire()), Some(d));
    }
  }

  #[test]
  fn direction_rejects_out_of_range() {
    assert_eq!(Direction::from_wire(4), None);
  }

  #[test]
  fn gather_message_validate_requires_single_address() {
    let a = AddrInfo::new(PeerId::random(), vec![]);
    assert!(GatherMessage::ConnectionRequest(vec![a.clone()]).validate().is_ok());
    assert!(GatherMessage::ConnectionRequest(vec![]).validate().is_err());
    assert!(GatherMessage::ConnectionRequest(vec![a.clone(), a.clone()])
      .validate()
      .is_err());
  }

  #[test]
  fn gathering_finished_requires_nonempty() {
    assert!(GatherMessage::GatheringFinished(vec![]).validate().is_err());
  }

  #[test]
  fn gather_message_msgpack_roundtrip() {
    let a = AddrInfo::new(PeerId::random(), vec!["/ip4/127.0.0.1/tcp/4001".parse().unwrap()]);
    let msg = GatherMessage::Connected(vec![a]);
    let bytes = rmp_serde::to_vec(&msg).unwrap();
    let decoded: GatherMessage = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(msg, decoded);
  }

  #[test]
  fn gather_point_advert_msgpack_roundtrip() {
    let advert = GatherPointAdvert {
      facilitator: AddrInfo::new(PeerId::random(), vec![]),
      ttl: Duration::from_secs(60),
      desired_count: 3,
      current_count: 1,
    };
    let bytes = rmp_serde::to_vec(&advert).unwrap();
    let decoded: GatherPointAdvert = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(advert, decoded);
  }

  #[test]
  fn game_request_response_msgpack_roundtrip() {
    for req in [GameRequest::SeedOffer(42), GameRequest::Move(Direction::Left)] {
      let bytes = rmp_serde::to_vec(&req).unwrap();
      let decoded: GameRequest = rmp_serde::from_slice(&bytes).unwrap();
      assert_eq!(req, decoded);
    }

    for resp in [GameResponse::SeedAck(7), GameResponse::Ack] {
      let bytes = rmp_serde::to_vec(&resp).unwrap();
      let decoded: GameResponse = rmp_serde::from_slice(&bytes).unwrap();
      assert_eq!(resp, decoded);
    }
  }
}
