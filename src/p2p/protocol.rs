//! P2P protocol messages
//!
//! Defines the message types the checkpoint protocol sends and receives,
//! and the framed wire encoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::CheckpointMessage;
use crate::crypto::Hash;

/// Network magic bytes
pub const NETWORK_MAGIC: [u8; 4] = [0x53, 0x54, 0x4B, 0x43]; // "STKC"

/// Maximum message size (4 MB)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Message too short")]
    TooShort,
    #[error("Invalid network magic")]
    BadMagic,
    #[error("Message too large: {0} bytes")]
    TooLarge(usize),
    #[error("Incomplete message")]
    Incomplete,
    #[error("Deserialization error: {0}")]
    Decode(#[from] bincode::Error),
}

/// P2P message types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Request data
    GetData(Vec<InvItem>),
    /// Request blocks
    GetBlocks(GetBlocksMessage),
    /// Signed sync-checkpoint
    Checkpoint(CheckpointMessage),
}

/// Inventory item type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InvType {
    Block,
}

/// Inventory item (reference to a block)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvItem {
    pub inv_type: InvType,
    pub hash: Hash,
}

impl InvItem {
    pub fn block(hash: Hash) -> Self {
        Self {
            inv_type: InvType::Block,
            hash,
        }
    }
}

/// Get blocks request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocksMessage {
    /// Block locator hashes (newest to oldest)
    pub block_locators: Vec<Hash>,
    /// Stop hash (zero for no limit)
    pub stop_hash: Hash,
}

impl Message {
    /// Serialize message to a framed byte buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = bincode::serialize(self).unwrap_or_default();

        let mut bytes = Vec::with_capacity(4 + 4 + payload.len());
        bytes.extend_from_slice(&NETWORK_MAGIC);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);

        bytes
    }

    /// Deserialize message from a framed byte buffer
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 8 {
            return Err(ProtocolError::TooShort);
        }

        // Check magic
        if bytes[0..4] != NETWORK_MAGIC {
            return Err(ProtocolError::BadMagic);
        }

        let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(length));
        }

        if bytes.len() < 8 + length {
            return Err(ProtocolError::Incomplete);
        }

        Ok(bincode::deserialize(&bytes[8..8 + length])?)
    }

    /// Get the command name for this message
    pub fn command(&self) -> &'static str {
        match self {
            Message::GetData(_) => "getdata",
            Message::GetBlocks(_) => "getblocks",
            Message::Checkpoint(_) => "checkpoint",
        }
    }
}

/// Build block locator hashes for sync, starting at `tip_height`
pub fn build_block_locator(tip_height: u64, get_hash: impl Fn(u64) -> Option<Hash>) -> Vec<Hash> {
    let mut locator = Vec::new();
    let mut step = 1u64;
    let mut height = tip_height;

    // Add hashes with exponentially increasing steps
    while height > 0 {
        if let Some(hash) = get_hash(height) {
            locator.push(hash);
        }

        if height < step {
            break;
        }

        height -= step;

        // Increase step after first 10 entries
        if locator.len() > 10 {
            step *= 2;
        }
    }

    // Always include genesis
    if let Some(hash) = get_hash(0) {
        if locator.last() != Some(&hash) {
            locator.push(hash);
        }
    }

    locator
}
