//! Block index
//!
//! The checkpoint manager only needs a narrow view of the chain: lookup by
//! hash, ancestry, main-chain membership and the ability to switch the best
//! chain to a checkpointed block. `ChainIndex` is that view; `BlockIndex` is
//! an in-memory implementation used by the node and in tests.

use std::collections::HashMap;
use thiserror::Error;

use crate::crypto::Hash;

/// Chain index errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Unknown block {0}")]
    UnknownBlock(Hash),
    #[error("Unknown parent {parent} for block {block}")]
    UnknownParent { block: Hash, parent: Hash },
    #[error("Block index structure failure at {0}")]
    BrokenAncestry(Hash),
}

/// Index entry for one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub hash: Hash,
    /// Zero for genesis
    pub prev_hash: Hash,
    pub height: u64,
    /// Block timestamp (seconds since Unix epoch)
    pub time: u64,
}

/// Read access to the block tree plus best-chain switching
pub trait ChainIndex {
    /// Look up a block by hash
    fn get(&self, hash: &Hash) -> Option<BlockIndexEntry>;

    /// Tip of the best chain
    fn best(&self) -> BlockIndexEntry;

    /// Hash of the best-chain block at `height`
    fn main_chain_hash(&self, height: u64) -> Option<Hash>;

    /// Make the chain ending at `hash` the best chain
    fn set_best_chain(&mut self, hash: &Hash) -> Result<(), ChainError>;

    fn contains(&self, hash: &Hash) -> bool {
        self.get(hash).is_some()
    }

    fn is_in_main_chain(&self, hash: &Hash) -> bool {
        self.get(hash)
            .and_then(|entry| self.main_chain_hash(entry.height))
            .is_some_and(|main| main == *hash)
    }

    /// Walk back from `from` to the ancestor at `height`. `from` itself is
    /// returned when already at that height.
    fn ancestor(&self, from: &BlockIndexEntry, height: u64) -> Result<BlockIndexEntry, ChainError> {
        if height > from.height {
            return Err(ChainError::BrokenAncestry(from.hash));
        }
        let mut entry = *from;
        while entry.height > height {
            entry = self
                .get(&entry.prev_hash)
                .ok_or(ChainError::BrokenAncestry(entry.hash))?;
        }
        Ok(entry)
    }
}

/// In-memory block tree with an explicit best chain
#[derive(Debug)]
pub struct BlockIndex {
    /// Block index: hash -> entry
    entries: HashMap<Hash, BlockIndexEntry>,
    /// Best chain, indexed by height
    main_chain: Vec<Hash>,
}

impl BlockIndex {
    /// Create an index holding only the genesis block
    pub fn new(genesis_hash: Hash, genesis_time: u64) -> Self {
        let genesis = BlockIndexEntry {
            hash: genesis_hash,
            prev_hash: Hash::zero(),
            height: 0,
            time: genesis_time,
        };
        let mut entries = HashMap::new();
        entries.insert(genesis_hash, genesis);

        Self {
            entries,
            main_chain: vec![genesis_hash],
        }
    }

    /// Index a block on top of an already indexed parent. The best chain is
    /// extended when the parent is the current tip.
    pub fn add_block(&mut self, hash: Hash, prev_hash: Hash, time: u64) -> Result<BlockIndexEntry, ChainError> {
        let parent = self
            .entries
            .get(&prev_hash)
            .copied()
            .ok_or(ChainError::UnknownParent { block: hash, parent: prev_hash })?;

        let entry = BlockIndexEntry {
            hash,
            prev_hash,
            height: parent.height + 1,
            time,
        };
        self.entries.insert(hash, entry);

        if self.main_chain.last() == Some(&prev_hash) {
            self.main_chain.push(hash);
        }

        Ok(entry)
    }

    /// Number of indexed blocks, all branches included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn height(&self) -> u64 {
        self.main_chain.len() as u64 - 1
    }
}

impl ChainIndex for BlockIndex {
    fn get(&self, hash: &Hash) -> Option<BlockIndexEntry> {
        self.entries.get(hash).copied()
    }

    fn best(&self) -> BlockIndexEntry {
        // main_chain always holds at least genesis
        let tip = self.main_chain[self.main_chain.len() - 1];
        self.entries[&tip]
    }

    fn main_chain_hash(&self, height: u64) -> Option<Hash> {
        self.main_chain.get(height as usize).copied()
    }

    fn set_best_chain(&mut self, hash: &Hash) -> Result<(), ChainError> {
        let tip = self.get(hash).ok_or(ChainError::UnknownBlock(*hash))?;

        let mut chain = vec![Hash::zero(); tip.height as usize + 1];
        let mut entry = tip;
        loop {
            chain[entry.height as usize] = entry.hash;
            if entry.height == 0 {
                break;
            }
            entry = self
                .get(&entry.prev_hash)
                .ok_or(ChainError::BrokenAncestry(entry.hash))?;
        }

        self.main_chain = chain;
        Ok(())
    }
}
