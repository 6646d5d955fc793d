mod codec;
mod config;
mod error;
mod ping;
mod router;
mod wire;

pub mod bus;
pub mod game;
pub mod gather;
pub mod heartbeat;
pub mod libp2p_backend;
pub mod mesh;
pub mod node;
pub mod transport;

#[cfg(test)]
mod testsupport;

pub use {
  bytes::Bytes,
  config::Config,
  error::{Error, PeerFault},
  libp2p_backend::bootstrap,
  node::Node,
  wire::{AddrInfo, Direction},
};
