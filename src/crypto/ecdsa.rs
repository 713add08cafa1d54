//! ECDSA signatures for checkpoint messages
//!
//! secp256k1 with DER-encoded signatures over a double SHA-256 prehash,
//! matching the checkpoint master key format used on the wire.

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use super::Hash;

/// Signature errors
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

/// Private key of the checkpoint master. Only the node that issues
/// sync-checkpoints holds one.
#[derive(Clone)]
pub struct CheckpointKey(SigningKey);

impl std::fmt::Debug for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CheckpointKey([REDACTED])")
    }
}

impl CheckpointKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        CheckpointKey(SigningKey::random(&mut OsRng))
    }

    /// Create from a 32-byte secret scalar
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        SigningKey::from_slice(bytes)
            .map(CheckpointKey)
            .map_err(|_| SignatureError::InvalidPrivateKey)
    }

    /// Create from the hex form accepted in node configuration
    pub fn from_hex(hex: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(hex.trim()).map_err(|_| SignatureError::InvalidPrivateKey)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidPrivateKey)?;
        Self::from_bytes(&bytes)
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> MasterPublicKey {
        MasterPublicKey(self.0.verifying_key().clone())
    }

    /// Sign a message digest, returning the DER encoding
    pub fn sign(&self, digest: &Hash) -> Result<Vec<u8>, SignatureError> {
        let signature: Signature = self
            .0
            .sign_prehash(&digest.0)
            .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }
}

/// The network's checkpoint master public key
#[derive(Clone)]
pub struct MasterPublicKey(VerifyingKey);

impl MasterPublicKey {
    /// Parse a SEC1 encoded point (compressed or uncompressed)
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(MasterPublicKey)
            .map_err(|_| SignatureError::InvalidPublicKey)
    }

    pub fn from_hex(hex: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(hex).map_err(|_| SignatureError::InvalidPublicKey)?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Uncompressed SEC1 encoding
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_sec1_bytes())
    }

    /// Verify a DER signature over `digest`. High-S signatures are
    /// normalized first; any malformed input simply fails verification.
    pub fn verify(&self, digest: &Hash, signature_der: &[u8]) -> bool {
        let signature = match Signature::from_der(signature_der) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let signature = signature.normalize_s().unwrap_or(signature);

        self.0.verify_prehash(&digest.0, &signature).is_ok()
    }
}

impl PartialEq for MasterPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_sec1_bytes() == other.to_sec1_bytes()
    }
}

impl Eq for MasterPublicKey {}

impl std::fmt::Debug for MasterPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterPublicKey({})", self.to_hex())
    }
}
