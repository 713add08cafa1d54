//! Storage module - block index view and checkpoint persistence

mod index;
pub mod db;

pub use db::{CheckpointDb, CheckpointStore, StorageError};
pub use index::*;
