//! JSON-RPC API Module
//!
//! Provides an HTTP interface for operators to inspect and issue checkpoints.

mod methods;
mod server;

pub use methods::*;
pub use server::*;
