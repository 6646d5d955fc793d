//! Game instance: seed negotiation and synchronized turn aggregation once
//! a gathering has produced a clique.

mod instance;

pub use instance::{GameEvent, GameInstance};
