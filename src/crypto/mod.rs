//! Cryptography module - SHA-256 hashing and ECDSA checkpoint signatures

mod hash;
mod ecdsa;

pub use hash::*;
pub use ecdsa::*;
