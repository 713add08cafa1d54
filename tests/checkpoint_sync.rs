//! End-to-end checkpoint synchronization between a master and a node

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stake_core::checkpoint::{CheckpointManager, CheckpointMessage, CheckpointMode, SyncOutcome};
use stake_core::consensus::ChainParams;
use stake_core::constants::{COIN, ONE_DAY};
use stake_core::crypto::{sha256, CheckpointKey, Hash};
use stake_core::minting::{Cancellation, KernelSeed, KernelWorker, SearchInterval, ShutdownSignal};
use stake_core::p2p::{Message, PeerConnection, PeerInfo};
use stake_core::storage::{BlockIndex, CheckpointDb, CheckpointStore, StorageError};

const GENESIS_TIME: u64 = 1_600_000_000;

/// Store that counts writes
#[derive(Default)]
struct CountingStore {
    hash: Mutex<Option<Hash>>,
    writes: AtomicUsize,
}

impl CheckpointStore for CountingStore {
    fn read_sync_checkpoint(&self) -> Result<Option<Hash>, StorageError> {
        Ok(*self.hash.lock())
    }

    fn write_sync_checkpoint(&self, hash: &Hash) -> Result<(), StorageError> {
        *self.hash.lock() = Some(*hash);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn build_chain(height: u64) -> (BlockIndex, Vec<Hash>) {
    let genesis = sha256(b"sync-genesis");
    let mut chain = BlockIndex::new(genesis, GENESIS_TIME);
    let mut hashes = vec![genesis];
    for h in 1..=height {
        let hash = sha256(format!("block-{}", h).as_bytes());
        chain
            .add_block(hash, hashes[h as usize - 1], GENESIS_TIME + h * 600)
            .unwrap();
        hashes.push(hash);
    }
    (chain, hashes)
}

fn peer(port: u16) -> PeerInfo {
    let addr: SocketAddr = format!("10.0.0.1:{}", port).parse().unwrap();
    PeerInfo::new(addr)
}

#[test]
fn test_checkpoint_advances_with_single_write() {
    let (mut chain, hashes) = build_chain(1000);
    let key = CheckpointKey::generate();
    let params = Arc::new(ChainParams::custom(hashes[0], GENESIS_TIME, key.public_key()));

    let store = CountingStore::default();
    *store.hash.lock() = Some(hashes[900]);
    let node = CheckpointManager::new(params, store, CheckpointMode::Strict);

    assert_eq!(node.load_sync_checkpoint(&chain).unwrap(), hashes[900]);
    assert_eq!(node.store().writes.load(Ordering::SeqCst), 0);

    let msg = CheckpointMessage::sign(hashes[1000], &key).unwrap();
    let mut sender = peer(1);
    let outcome = node
        .process_sync_checkpoint(&mut chain, &msg, Some(&mut sender))
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Accepted);
    assert_eq!(node.sync_checkpoint(), hashes[1000]);
    assert_eq!(node.store().writes.load(Ordering::SeqCst), 1);
    assert_eq!(sender.checkpoint_known(), hashes[1000]);

    // Relay reaches only peers that have not seen it
    let mut others = vec![peer(2), peer(3), sender];
    assert_eq!(node.relay_sync_checkpoint(others.iter_mut()), 2);
    for other in &mut others[..2] {
        let sent = other.drain_outbound();
        assert!(matches!(sent.as_slice(), [Message::Checkpoint(m)] if m.checkpoint_hash() == hashes[1000]));
    }
    assert!(others[2].drain_outbound().is_empty());

    // A stale checkpoint changes nothing
    let stale = CheckpointMessage::sign(hashes[950], &key).unwrap();
    let outcome = node.process_sync_checkpoint(&mut chain, &stale, None).unwrap();
    assert_eq!(outcome, SyncOutcome::Ignored);
    assert_eq!(node.store().writes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_pending_checkpoint_waits_for_block() {
    let (mut chain, hashes) = build_chain(50);
    let key = CheckpointKey::generate();
    let params = Arc::new(ChainParams::custom(hashes[0], GENESIS_TIME, key.public_key()));
    let node = CheckpointManager::new(params, CountingStore::default(), CheckpointMode::Strict);

    let future = sha256(b"block-51");
    let msg = CheckpointMessage::sign(future, &key).unwrap();
    let mut sender = peer(1);

    let outcome = node
        .process_sync_checkpoint(&mut chain, &msg, Some(&mut sender))
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Pending);
    assert_eq!(node.pending_checkpoint(), Some(future));
    assert!(node.wanted_by_pending_sync_checkpoint(&future));

    let requests = sender.drain_outbound();
    assert!(requests.iter().any(|m| matches!(m, Message::GetBlocks(_))));
    assert!(requests.iter().any(|m| matches!(m, Message::GetData(_))));

    let mut peers = vec![peer(2)];
    assert!(!node.accept_pending_sync_checkpoint(&mut chain, peers.iter_mut()).unwrap());

    chain
        .add_block(future, hashes[50], GENESIS_TIME + 51 * 600)
        .unwrap();
    assert!(node.accept_pending_sync_checkpoint(&mut chain, peers.iter_mut()).unwrap());

    assert_eq!(node.sync_checkpoint(), future);
    assert_eq!(node.pending_checkpoint(), None);
    assert_eq!(node.checkpoint_message(), msg);
    assert_eq!(peers[0].checkpoint_known(), future);
    assert_eq!(node.store().writes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_master_issues_and_node_follows() {
    let (mut master_chain, hashes) = build_chain(40);
    let (mut node_chain, _) = build_chain(40);
    let key = CheckpointKey::generate();
    let params = Arc::new(ChainParams::custom(hashes[0], GENESIS_TIME, key.public_key()));

    let master = CheckpointManager::new(params.clone(), CountingStore::default(), CheckpointMode::Strict);
    master.set_checkpoint_key(&hex::encode(key.to_bytes())).unwrap();
    let node = CheckpointManager::new(params, CountingStore::default(), CheckpointMode::Strict);

    let mut link = vec![peer(1)];
    let issued = master
        .auto_send_sync_checkpoint(&mut master_chain, link.iter_mut())
        .unwrap()
        .unwrap();
    assert_eq!(master.sync_checkpoint(), issued);

    for message in link[0].drain_outbound() {
        if let Message::Checkpoint(msg) = message {
            let outcome = node.process_sync_checkpoint(&mut node_chain, &msg, None).unwrap();
            assert_eq!(outcome, SyncOutcome::Accepted);
        }
    }
    assert_eq!(node.sync_checkpoint(), issued);
}

#[test]
fn test_checkpoint_survives_restart() {
    let dir = std::env::temp_dir().join(format!("stake-core-sync-{}", rand::random::<u64>()));
    let (mut chain, hashes) = build_chain(30);
    let key = CheckpointKey::generate();
    let params = Arc::new(ChainParams::custom(hashes[0], GENESIS_TIME, key.public_key()));

    {
        let db = CheckpointDb::open(&dir).unwrap();
        let node = CheckpointManager::new(params.clone(), db, CheckpointMode::Strict);
        let msg = CheckpointMessage::sign(hashes[30], &key).unwrap();
        node.process_sync_checkpoint(&mut chain, &msg, None).unwrap();
    }

    let db = CheckpointDb::open(&dir).unwrap();
    let node = CheckpointManager::new(params, db, CheckpointMode::Strict);
    assert_eq!(node.load_sync_checkpoint(&chain).unwrap(), hashes[30]);

    drop(node);
    let _ = std::fs::remove_dir_all(&dir);
}

/// Raises the shared shutdown signal on its `polls + 1`-th poll
struct TripAfter {
    signal: ShutdownSignal,
    remaining: AtomicUsize,
}

impl TripAfter {
    fn new(signal: &ShutdownSignal, polls: usize) -> Self {
        Self {
            signal: signal.clone(),
            remaining: AtomicUsize::new(polls),
        }
    }
}

impl Cancellation for TripAfter {
    fn is_cancelled(&self) -> bool {
        let exhausted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err();
        if exhausted {
            self.signal.trigger();
        }
        exhausted
    }
}

/// Every timestamp is a solution: a thousand coins two days old beat any
/// target
fn always_hits() -> KernelWorker {
    KernelWorker::new(KernelSeed::from_bytes([7u8; 24]), 0x2000ffff, 0, 1000 * COIN)
}

#[test]
fn test_kernel_scan_stops_once_signalled() {
    let worker = always_hits();
    let begin = 2 * ONE_DAY as u32;
    let shutdown = ShutdownSignal::new();

    let found = worker.scan_forward(begin, u32::MAX, &TripAfter::new(&shutdown, 10));
    let stamps: Vec<u32> = found.iter().map(|s| s.timestamp).collect();
    assert_eq!(stamps, (begin..begin + 10).collect::<Vec<_>>());
    assert!(shutdown.is_triggered());

    // Every later scan sharing the signal stops before its first hash
    assert!(worker.scan_forward(begin, u32::MAX, &shutdown).is_empty());
    assert_eq!(
        worker.scan_backward(SearchInterval::new(u32::MAX, begin), &shutdown),
        None
    );
}

#[test]
fn test_parallel_scan_stops_once_signalled() {
    let worker = always_hits();
    let begin = 2 * ONE_DAY as u32;
    let shutdown = ShutdownSignal::new();

    let found = worker.scan_forward_parallel(begin, u32::MAX, 4, &TripAfter::new(&shutdown, 40));
    assert_eq!(found.len(), 40);
    assert!(found.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
    assert!(shutdown.is_triggered());
}

#[test]
fn test_backward_scan_stops_once_signalled() {
    // Nothing meets a zero target, so only cancellation ends the scan
    let worker = KernelWorker::new(KernelSeed::from_bytes([7u8; 24]), 0x01000000, 0, COIN);
    let shutdown = ShutdownSignal::new();

    let found = worker.scan_backward(SearchInterval::new(u32::MAX, 0), &TripAfter::new(&shutdown, 25));
    assert_eq!(found, None);
    assert!(shutdown.is_triggered());
}
