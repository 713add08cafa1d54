//! Database persistence layer using Sled
//!
//! Holds the node's active sync-checkpoint across restarts.

use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;

use crate::crypto::Hash;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Corrupt record under {key}: expected {expected} bytes, found {found}")]
    Corrupt {
        key: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Durable home of the sync-checkpoint hash
pub trait CheckpointStore: Send + Sync {
    /// `None` when nothing has been written yet
    fn read_sync_checkpoint(&self) -> Result<Option<Hash>, StorageError>;

    /// Persist the hash; must be durable when this returns `Ok`
    fn write_sync_checkpoint(&self, hash: &Hash) -> Result<(), StorageError>;
}

const CHECKPOINTS_TREE: &str = "checkpoints";
const SYNC_CHECKPOINT_KEY: &str = "sync_checkpoint";

/// Database wrapper
#[derive(Debug, Clone)]
pub struct CheckpointDb {
    db: Db,
    checkpoints_tree: Tree,
}

impl CheckpointDb {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Throwaway database, removed when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let checkpoints_tree = db.open_tree(CHECKPOINTS_TREE)?;
        Ok(Self {
            db,
            checkpoints_tree,
        })
    }
}

impl CheckpointStore for CheckpointDb {
    fn read_sync_checkpoint(&self) -> Result<Option<Hash>, StorageError> {
        match self.checkpoints_tree.get(SYNC_CHECKPOINT_KEY)? {
            Some(bytes) => {
                let arr: [u8; 32] =
                    bytes[..].try_into().map_err(|_| StorageError::Corrupt {
                        key: SYNC_CHECKPOINT_KEY,
                        expected: 32,
                        found: bytes.len(),
                    })?;
                Ok(Some(Hash(arr)))
            }
            None => Ok(None),
        }
    }

    fn write_sync_checkpoint(&self, hash: &Hash) -> Result<(), StorageError> {
        self.checkpoints_tree
            .insert(SYNC_CHECKPOINT_KEY, hash.0.as_ref())?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256d;

    #[test]
    fn test_empty_store_reads_none() {
        let db = CheckpointDb::temporary().unwrap();
        assert_eq!(db.read_sync_checkpoint().unwrap(), None);
    }

    #[test]
    fn test_write_then_read() {
        let db = CheckpointDb::temporary().unwrap();
        let first = sha256d(b"block 1");
        let second = sha256d(b"block 2");

        db.write_sync_checkpoint(&first).unwrap();
        assert_eq!(db.read_sync_checkpoint().unwrap(), Some(first));

        db.write_sync_checkpoint(&second).unwrap();
        assert_eq!(db.read_sync_checkpoint().unwrap(), Some(second));
    }

    #[test]
    fn test_corrupt_record_detected() {
        let db = CheckpointDb::temporary().unwrap();
        db.checkpoints_tree
            .insert(SYNC_CHECKPOINT_KEY, &[1u8, 2, 3][..])
            .unwrap();

        assert!(matches!(
            db.read_sync_checkpoint(),
            Err(StorageError::Corrupt { found: 3, .. })
        ));
    }

    #[test]
    fn test_reopen_persists() {
        let dir = std::env::temp_dir().join(format!("stake_core_db_{}", std::process::id()));
        let hash = sha256d(b"durable");
        {
            let db = CheckpointDb::open(&dir).unwrap();
            db.write_sync_checkpoint(&hash).unwrap();
        }
        {
            let db = CheckpointDb::open(&dir).unwrap();
            assert_eq!(db.read_sync_checkpoint().unwrap(), Some(hash));
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
