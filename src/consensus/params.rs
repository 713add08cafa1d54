//! Per-network consensus parameters
//!
//! Hardened checkpoints, the banned-block list and the checkpoint master
//! key are compiled in and selected by network at startup. They are never
//! mutated afterwards and can be read from any thread without locking.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, MasterPublicKey, SignatureError};

/// Network selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

const MAINNET_GENESIS: Hash =
    Hash::from_static_hex("00000a060336cbb72fe969666d337b87198f1859b3f25a5ab0c37c7d0f6e09a7");
const MAINNET_GENESIS_TIME: u64 = 1_360_105_017;

/// Hardened checkpoints beyond genesis are added only with hashes taken
/// from the live chain.
const MAINNET_CHECKPOINTS: &[(u64, Hash)] = &[(0, MAINNET_GENESIS)];

pub const MAINNET_BANNED: &[Hash] = &[];

const MAINNET_LAST_CHECKPOINT_TIME: u64 = MAINNET_GENESIS_TIME;

const MAINNET_MASTER_PUBKEY: &str = "0486ae24aed35ca5ff5bf680437d21ca199b8d492e127394beac91e7946a610d39bb583761286faa220ad52371528cf6bcedeabcc921257e7883993a5bf1e26b36";

const TESTNET_GENESIS: Hash =
    Hash::from_static_hex("000c763e402f2436da9ed36c7286f62c3f6e5dbafce9ff289bd43d7459327eb0");
const TESTNET_GENESIS_TIME: u64 = 1_360_105_017;

const TESTNET_CHECKPOINTS: &[(u64, Hash)] = &[(0, TESTNET_GENESIS)];

const TESTNET_LAST_CHECKPOINT_TIME: u64 = TESTNET_GENESIS_TIME;

const TESTNET_MASTER_PUBKEY: &str = "04d00d3ec208780eed04a811ee5165479c8079a4ab9175fa9f4a4b910068bf386ab0dcb33c3bdce2f209dd8d00be3edab7ddcdfa8adc7134212dd246d0a31b577b";

/// Immutable consensus parameters for one network
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network: Network,
    pub genesis_hash: Hash,
    pub genesis_time: u64,
    /// Hardened checkpoints: height -> block hash
    pub hardened_checkpoints: BTreeMap<u64, Hash>,
    pub banned_blocks: HashSet<Hash>,
    pub last_checkpoint_time: u64,
    /// Key every sync-checkpoint must be signed with
    pub master_pubkey: MasterPublicKey,
}

impl ChainParams {
    /// Parameters for the given network
    pub fn for_network(network: Network) -> Result<Self, SignatureError> {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
        }
    }

    pub fn mainnet() -> Result<Self, SignatureError> {
        Ok(Self {
            network: Network::Mainnet,
            genesis_hash: MAINNET_GENESIS,
            genesis_time: MAINNET_GENESIS_TIME,
            hardened_checkpoints: MAINNET_CHECKPOINTS.iter().copied().collect(),
            banned_blocks: MAINNET_BANNED.iter().copied().collect(),
            last_checkpoint_time: MAINNET_LAST_CHECKPOINT_TIME,
            master_pubkey: MasterPublicKey::from_hex(MAINNET_MASTER_PUBKEY)?,
        })
    }

    pub fn testnet() -> Result<Self, SignatureError> {
        Ok(Self {
            network: Network::Testnet,
            genesis_hash: TESTNET_GENESIS,
            genesis_time: TESTNET_GENESIS_TIME,
            hardened_checkpoints: TESTNET_CHECKPOINTS.iter().copied().collect(),
            banned_blocks: HashSet::new(),
            last_checkpoint_time: TESTNET_LAST_CHECKPOINT_TIME,
            master_pubkey: MasterPublicKey::from_hex(TESTNET_MASTER_PUBKEY)?,
        })
    }

    /// Build a private network around a caller-supplied genesis and master
    /// key, with genesis as the only hardened checkpoint.
    pub fn custom(genesis_hash: Hash, genesis_time: u64, master_pubkey: MasterPublicKey) -> Self {
        let mut hardened_checkpoints = BTreeMap::new();
        hardened_checkpoints.insert(0, genesis_hash);

        Self {
            network: Network::Testnet,
            genesis_hash,
            genesis_time,
            hardened_checkpoints,
            banned_blocks: HashSet::new(),
            last_checkpoint_time: genesis_time,
            master_pubkey,
        }
    }

    pub fn with_checkpoint(mut self, height: u64, hash: Hash) -> Self {
        self.hardened_checkpoints.insert(height, hash);
        self
    }

    pub fn with_banned(mut self, hash: Hash) -> Self {
        self.banned_blocks.insert(hash);
        self
    }
}
