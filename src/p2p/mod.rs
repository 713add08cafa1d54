//! P2P module - wire messages and per-peer checkpoint relay state

mod peer;
mod protocol;

pub use peer::*;
pub use protocol::*;
