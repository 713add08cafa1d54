//! Stake Core Library
//!
//! Consensus synchronization for a proof-of-stake chain: the synchronized
//! checkpoint protocol, where a master key broadcasts a signed "last known
//! good" block that every node refuses to reorganize past, and the kernel
//! search that finds timestamps at which a coin input may stake.

pub mod checkpoint;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod minting;
pub mod p2p;
pub mod rpc;
pub mod storage;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Atomic units per coin
    pub const COIN: u64 = 1_000_000;

    pub const ONE_HOUR: u64 = 60 * 60;

    pub const ONE_DAY: u64 = 24 * ONE_HOUR;

    /// Stake age stops accruing after 90 days
    pub const STAKE_MAX_AGE: u64 = 90 * ONE_DAY;

    /// Length of the fixed kernel prefix (stake modifier and input metadata)
    pub const KERNEL_SEED_LEN: usize = 24;

    /// Checkpoint message payload version
    pub const CHECKPOINT_VERSION: i32 = 1;

    /// Minimum age, relative to the best block, of a checkpoint before it is
    /// mature and of a block before the master auto-checkpoints it
    pub const CHECKPOINT_MAX_SPAN: u64 = ONE_HOUR;

    /// Blocks the best chain must extend past the sync-checkpoint before it
    /// counts as mature
    pub const SYNC_CHECKPOINT_MATURITY: u64 = 500;

    /// Minimum depth of an automatically selected checkpoint
    pub const AUTO_CHECKPOINT_DEPTH: u64 = 8;
}
