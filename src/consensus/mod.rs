//! Consensus module - network parameters and stake target arithmetic

mod params;
mod target;

pub use params::*;
pub use target::*;
