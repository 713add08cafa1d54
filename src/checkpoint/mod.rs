//! Synchronized checkpoints - signed messages and the manager that applies them

mod error;
mod manager;
mod message;
mod mode;

pub use error::*;
pub use manager::*;
pub use message::*;
pub use mode::*;
