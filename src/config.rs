//! Crate-wide tunables: a small knob bag injected at construction, not a
//! global.

use std::time::Duration;

pub const GATHER_PROTOCOL_ID: &str = "/snake/gather/0.1.0";
pub const GAME_PROTOCOL_ID: &str = "/snake/game/0.1.0";

/// Default heartbeat pacing.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct Config {
  /// Spacing between a ping's response and the next ping for a given peer.
  pub heartbeat_interval: Duration,

  /// Default gather-point beacon TTL, also the beacon's per-publish
  /// timeout.
  pub gather_ttl: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
      gather_ttl: Duration::from_secs(60),
    }
  }
}
