//! Signed sync-checkpoint message
//!
//! A checkpoint travels as two byte strings: the canonical payload
//! (`version || checkpoint_hash`) and a DER signature over its double
//! SHA-256. Receivers always re-parse the payload bytes; the decoded fields
//! are a cache of them and are never set independently.

use serde::{Deserialize, Serialize};

use super::CheckpointError;
use crate::constants::CHECKPOINT_VERSION;
use crate::crypto::{sha256d, CheckpointKey, Hash, MasterPublicKey};
use crate::p2p::{Message, PeerConnection};

/// Payload length: i32 version plus a 32-byte hash
pub const CHECKPOINT_PAYLOAD_LEN: usize = 4 + 32;

/// The signed part of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsignedCheckpoint {
    pub version: i32,
    pub checkpoint_hash: Hash,
}

impl UnsignedCheckpoint {
    pub fn new(checkpoint_hash: Hash) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            checkpoint_hash,
        }
    }

    /// Canonical bytes: little-endian version followed by the hash
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CHECKPOINT_PAYLOAD_LEN);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.checkpoint_hash.0);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        if bytes.len() != CHECKPOINT_PAYLOAD_LEN {
            return Err(CheckpointError::Malformed(format!(
                "payload is {} bytes, expected {}",
                bytes.len(),
                CHECKPOINT_PAYLOAD_LEN
            )));
        }

        let version = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[4..]);

        Ok(Self {
            version,
            checkpoint_hash: Hash(hash),
        })
    }
}

impl Default for UnsignedCheckpoint {
    fn default() -> Self {
        Self::new(Hash::zero())
    }
}

/// Wire form: payload bytes then signature bytes
#[derive(Serialize, Deserialize)]
struct WireCheckpoint {
    message: Vec<u8>,
    signature: Vec<u8>,
}

/// Sync-checkpoint message as broadcast by the checkpoint master
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireCheckpoint", into = "WireCheckpoint")]
pub struct CheckpointMessage {
    payload: UnsignedCheckpoint,
    message_bytes: Vec<u8>,
    signature: Vec<u8>,
}

impl Default for CheckpointMessage {
    fn default() -> Self {
        Self::null()
    }
}

impl CheckpointMessage {
    /// Unsigned message for the zero hash
    pub fn null() -> Self {
        let payload = UnsignedCheckpoint::default();
        Self {
            message_bytes: payload.to_bytes(),
            payload,
            signature: Vec::new(),
        }
    }

    /// Rebuild from received byte strings
    pub fn from_parts(message_bytes: Vec<u8>, signature: Vec<u8>) -> Result<Self, CheckpointError> {
        let payload = UnsignedCheckpoint::from_bytes(&message_bytes)?;
        Ok(Self {
            payload,
            message_bytes,
            signature,
        })
    }

    /// Create a checkpoint for `checkpoint_hash` signed with the master key
    pub fn sign(checkpoint_hash: Hash, key: &CheckpointKey) -> Result<Self, CheckpointError> {
        let payload = UnsignedCheckpoint::new(checkpoint_hash);
        let message_bytes = payload.to_bytes();
        let signature = key.sign(&sha256d(&message_bytes))?;

        Ok(Self {
            payload,
            message_bytes,
            signature,
        })
    }

    /// Replace the payload. On error the message is left untouched.
    pub fn set_payload(&mut self, raw: &[u8]) -> Result<(), CheckpointError> {
        self.payload = UnsignedCheckpoint::from_bytes(raw)?;
        self.message_bytes = raw.to_vec();
        Ok(())
    }

    pub fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }

    /// Check the signature against the master key. Never errors; anything
    /// malformed just fails.
    pub fn verify_signature(&self, master: &MasterPublicKey) -> bool {
        master.verify(&sha256d(&self.message_bytes), &self.signature)
    }

    /// Send to `peer` unless it already has this checkpoint
    pub fn relay_to(&self, peer: &mut dyn PeerConnection) -> bool {
        if peer.checkpoint_known() == self.payload.checkpoint_hash {
            return false;
        }
        peer.set_checkpoint_known(self.payload.checkpoint_hash);
        peer.push_message(Message::Checkpoint(self.clone()));
        true
    }

    pub fn is_null(&self) -> bool {
        self.payload.checkpoint_hash.is_zero()
    }

    pub fn checkpoint_hash(&self) -> Hash {
        self.payload.checkpoint_hash
    }

    pub fn version(&self) -> i32 {
        self.payload.version
    }

    pub fn message_bytes(&self) -> &[u8] {
        &self.message_bytes
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Identifier of the whole message, signature included
    pub fn content_hash(&self) -> Hash {
        sha256d(&self.encode())
    }

    /// Wire encoding: each byte string prefixed by its u64 little-endian
    /// length
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.message_bytes.len() + self.signature.len());
        for field in [&self.message_bytes, &self.signature] {
            out.extend_from_slice(&(field.len() as u64).to_le_bytes());
            out.extend_from_slice(field);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let (message_bytes, rest) = take_prefixed(bytes)?;
        let (signature, rest) = take_prefixed(rest)?;
        if !rest.is_empty() {
            return Err(CheckpointError::Malformed(format!(
                "{} trailing bytes",
                rest.len()
            )));
        }
        Self::from_parts(message_bytes.to_vec(), signature.to_vec())
    }
}

fn take_prefixed(bytes: &[u8]) -> Result<(&[u8], &[u8]), CheckpointError> {
    if bytes.len() < 8 {
        return Err(CheckpointError::Malformed("truncated length prefix".to_string()));
    }
    let (prefix, rest) = bytes.split_at(8);
    let mut len = [0u8; 8];
    len.copy_from_slice(prefix);
    let len = u64::from_le_bytes(len);

    if len > rest.len() as u64 {
        return Err(CheckpointError::Malformed(format!(
            "field of {} bytes exceeds remaining {}",
            len,
            rest.len()
        )));
    }
    Ok(rest.split_at(len as usize))
}

impl TryFrom<WireCheckpoint> for CheckpointMessage {
    type Error = CheckpointError;

    fn try_from(wire: WireCheckpoint) -> Result<Self, Self::Error> {
        Self::from_parts(wire.message, wire.signature)
    }
}

impl From<CheckpointMessage> for WireCheckpoint {
    fn from(msg: CheckpointMessage) -> Self {
        WireCheckpoint {
            message: msg.message_bytes,
            signature: msg.signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;
    use crate::p2p::PeerInfo;

    fn signed(label: &[u8]) -> (CheckpointKey, CheckpointMessage) {
        let key = CheckpointKey::generate();
        let msg = CheckpointMessage::sign(sha256(label), &key).unwrap();
        (key, msg)
    }

    #[test]
    fn test_payload_layout() {
        let hash = sha256(b"block");
        let bytes = UnsignedCheckpoint::new(hash).to_bytes();

        assert_eq!(bytes.len(), CHECKPOINT_PAYLOAD_LEN);
        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..], &hash.0);
    }

    #[test]
    fn test_null_message() {
        let msg = CheckpointMessage::null();
        assert!(msg.is_null());
        assert_eq!(msg.version(), CHECKPOINT_VERSION);
        assert_eq!(msg.message_bytes(), UnsignedCheckpoint::default().to_bytes());
        assert!(msg.signature().is_empty());
    }

    #[test]
    fn test_sign_and_verify() {
        let (key, msg) = signed(b"block");
        assert!(!msg.is_null());
        assert!(msg.verify_signature(&key.public_key()));
        assert!(!msg.verify_signature(&CheckpointKey::generate().public_key()));
    }

    #[test]
    fn test_every_flipped_byte_fails_verification() {
        let (key, msg) = signed(b"tamper");
        let master = key.public_key();

        for i in 0..msg.signature().len() {
            let mut sig = msg.signature().to_vec();
            sig[i] ^= 0x01;
            let mut tampered = msg.clone();
            tampered.set_signature(sig);
            assert!(!tampered.verify_signature(&master), "signature byte {}", i);
        }

        for i in 0..msg.message_bytes().len() {
            let mut raw = msg.message_bytes().to_vec();
            raw[i] ^= 0x01;
            let mut tampered = msg.clone();
            tampered.set_payload(&raw).unwrap();
            assert!(!tampered.verify_signature(&master), "message byte {}", i);
        }
    }

    #[test]
    fn test_set_payload_rejects_bad_length() {
        let (_, mut msg) = signed(b"block");
        let before = msg.clone();

        assert!(matches!(
            msg.set_payload(&[0u8; 35]),
            Err(CheckpointError::Malformed(_))
        ));
        assert!(msg.set_payload(&[0u8; 37]).is_err());
        assert_eq!(msg, before);
    }

    #[test]
    fn test_set_payload_updates_fields_together() {
        let mut msg = CheckpointMessage::null();
        let hash = sha256(b"other");
        let mut raw = 7i32.to_le_bytes().to_vec();
        raw.extend_from_slice(&hash.0);

        msg.set_payload(&raw).unwrap();
        assert_eq!(msg.version(), 7);
        assert_eq!(msg.checkpoint_hash(), hash);
        assert_eq!(msg.message_bytes(), &raw[..]);
    }

    #[test]
    fn test_encode_matches_bincode_frame() {
        let (_, msg) = signed(b"frame");
        let encoded = msg.encode();

        assert_eq!(bincode::serialize(&msg).unwrap(), encoded);
        assert_eq!(CheckpointMessage::decode(&encoded).unwrap(), msg);

        let via_serde: CheckpointMessage = bincode::deserialize(&encoded).unwrap();
        assert_eq!(via_serde, msg);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let (_, msg) = signed(b"frame");
        let encoded = msg.encode();

        assert!(CheckpointMessage::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(CheckpointMessage::decode(&[0u8; 4]).is_err());

        let mut trailing = encoded.clone();
        trailing.push(0);
        assert!(CheckpointMessage::decode(&trailing).is_err());

        let mut oversize = encoded;
        oversize[0] = 0xff;
        assert!(CheckpointMessage::decode(&oversize).is_err());
    }

    #[test]
    fn test_content_hash_covers_signature() {
        let key = CheckpointKey::generate();
        let hash = sha256(b"same block");
        let a = CheckpointMessage::sign(hash, &key).unwrap();
        let mut b = a.clone();
        b.set_signature(vec![0x30, 0x00]);

        assert_eq!(a.checkpoint_hash(), b.checkpoint_hash());
        assert_ne!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), a.checkpoint_hash());
    }

    #[test]
    fn test_relay_is_idempotent_per_peer() {
        let (_, msg) = signed(b"relay");
        let mut peer = PeerInfo::new("127.0.0.1:9000".parse().unwrap());
        let mut other = PeerInfo::new("127.0.0.1:9001".parse().unwrap());

        assert!(msg.relay_to(&mut peer));
        assert!(!msg.relay_to(&mut peer));
        assert_eq!(peer.checkpoint_known(), msg.checkpoint_hash());
        assert_eq!(peer.drain_outbound().len(), 1);

        assert!(msg.relay_to(&mut other));

        let (_, newer) = signed(b"newer");
        assert!(newer.relay_to(&mut peer));
    }
}
