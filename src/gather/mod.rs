//! Gather protocol: lobby formation via a facilitator that searches a
//! shared peer mesh for a clique, and joiners that connect into it.

pub mod beacon;
pub mod facilitator;
pub mod joiner;

pub use crate::config::GATHER_PROTOCOL_ID as PROTOCOL_ID;

use {crate::game::GameInstance, libp2p::PeerId};

/// Fires exactly once per gathering outcome this node participates in,
/// whether as facilitator or chosen joiner.
pub struct GameEstablished {
  pub facilitator: PeerId,
  pub game: GameInstance,
}
