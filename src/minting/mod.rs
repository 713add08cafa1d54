//! Minting module - proof-of-stake kernel search and cancellation

mod kernel;
mod shutdown;

pub use kernel::*;
pub use shutdown::*;
