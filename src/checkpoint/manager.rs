//! Synchronized checkpoint manager
//!
//! Owns the node's view of the sync-checkpoint: the last block the
//! checkpoint master has vouched for. Blocks that would reorganize the best
//! chain past it are refused, and newer checkpoints are accepted only when
//! they descend from it.
//!
//! All mutable state sits behind one lock held for the whole of every
//! transition, persistence included. Compiled-in hardened checkpoints and
//! the ban list live in `ChainParams` and are read without locking.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{CheckpointError, CheckpointMessage, CheckpointMode};
use crate::consensus::ChainParams;
use crate::constants::{AUTO_CHECKPOINT_DEPTH, CHECKPOINT_MAX_SPAN, SYNC_CHECKPOINT_MATURITY};
use crate::crypto::{CheckpointKey, Hash};
use crate::p2p::{build_block_locator, GetBlocksMessage, InvItem, Message, PeerConnection};
use crate::storage::{BlockIndexEntry, ChainIndex, CheckpointStore};

/// Result of handing a signed checkpoint to the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Became the new sync-checkpoint
    Accepted,
    /// Already the sync-checkpoint; nothing changed
    AlreadyActive,
    /// Block not known yet; kept until it arrives
    Pending,
    /// Older than the current checkpoint but consistent with it
    Ignored,
}

impl SyncOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SyncOutcome::Accepted)
    }
}

fn is_mature(sync: &BlockIndexEntry, best: &BlockIndexEntry) -> bool {
    best.height > sync.height + SYNC_CHECKPOINT_MATURITY && sync.time + CHECKPOINT_MAX_SPAN < best.time
}

/// Snapshot of the checkpoint state for RPC and logging
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointStatus {
    pub synccheckpoint: Hash,
    pub height: Option<u64>,
    pub timestamp: Option<u64>,
    pub mode: CheckpointMode,
    pub pending: Option<Hash>,
    pub invalid: Option<Hash>,
    pub mature: bool,
    pub warning: Option<String>,
    /// This node holds the checkpoint master key
    pub master: bool,
}

#[derive(Debug, Default)]
struct SyncState {
    mode: CheckpointMode,
    sync_checkpoint: Hash,
    invalid_checkpoint: Hash,
    pending_checkpoint: Hash,
    pending_message: CheckpointMessage,
    checkpoint_message: CheckpointMessage,
    signing_key: Option<CheckpointKey>,
    warning: Option<String>,
}

impl SyncState {
    fn clear_pending(&mut self) {
        self.pending_checkpoint = Hash::zero();
        self.pending_message = CheckpointMessage::null();
    }
}

/// Sync-checkpoint state machine for one node
#[derive(Debug)]
pub struct CheckpointManager<S: CheckpointStore> {
    params: Arc<ChainParams>,
    store: S,
    state: Mutex<SyncState>,
}

impl<S: CheckpointStore> CheckpointManager<S> {
    /// Starts at genesis; call [`CheckpointManager::load_sync_checkpoint`]
    /// to pick up the persisted checkpoint.
    pub fn new(params: Arc<ChainParams>, store: S, mode: CheckpointMode) -> Self {
        let state = SyncState {
            mode,
            sync_checkpoint: params.genesis_hash,
            ..SyncState::default()
        };
        Self {
            params,
            store,
            state: Mutex::new(state),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn mode(&self) -> CheckpointMode {
        self.state.lock().mode
    }

    pub fn set_mode(&self, mode: CheckpointMode) {
        let mut state = self.state.lock();
        if state.mode != mode {
            info!(from = %state.mode, to = %mode, "checkpoint mode changed");
            state.mode = mode;
        }
    }

    pub fn sync_checkpoint(&self) -> Hash {
        self.state.lock().sync_checkpoint
    }

    /// Last rejected checkpoint (zero if none)
    pub fn invalid_checkpoint(&self) -> Hash {
        self.state.lock().invalid_checkpoint
    }

    pub fn pending_checkpoint(&self) -> Option<Hash> {
        let state = self.state.lock();
        (!state.pending_checkpoint.is_zero()).then_some(state.pending_checkpoint)
    }

    /// Last accepted checkpoint message (null if none was received)
    pub fn checkpoint_message(&self) -> CheckpointMessage {
        self.state.lock().checkpoint_message.clone()
    }

    /// Conflict warning recorded in advisory mode
    pub fn warning(&self) -> Option<String> {
        self.state.lock().warning.clone()
    }

    /// True unless a different block is hardened at `height`
    pub fn check_hardened(&self, height: u64, hash: &Hash) -> bool {
        self.params
            .hardened_checkpoints
            .get(&height)
            .map_or(true, |expected| expected == hash)
    }

    /// True unless `hash` is on the ban list
    pub fn check_banned(&self, hash: &Hash) -> bool {
        !self.params.banned_blocks.contains(hash)
    }

    /// Height of the highest hardened checkpoint
    pub fn total_blocks_estimate(&self) -> u64 {
        self.params
            .hardened_checkpoints
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
    }

    pub fn last_checkpoint_time(&self) -> u64 {
        self.params.last_checkpoint_time
    }

    /// Highest hardened checkpoint present in the block index
    pub fn last_hardened_checkpoint<C: ChainIndex + ?Sized>(&self, chain: &C) -> Option<BlockIndexEntry> {
        self.params
            .hardened_checkpoints
            .values()
            .rev()
            .find_map(|hash| chain.get(hash))
    }

    pub fn last_sync_checkpoint<C: ChainIndex + ?Sized>(&self, chain: &C) -> Option<BlockIndexEntry> {
        chain.get(&self.state.lock().sync_checkpoint)
    }

    /// Restore the persisted sync-checkpoint. Falls back to a reset when
    /// nothing is stored or the stored block is unknown to the index.
    pub fn load_sync_checkpoint<C: ChainIndex + ?Sized>(&self, chain: &C) -> Result<Hash, CheckpointError> {
        let mut state = self.state.lock();
        match self.store.read_sync_checkpoint()? {
            Some(hash) if chain.contains(&hash) => {
                state.sync_checkpoint = hash;
                info!(%hash, "loaded sync-checkpoint");
                Ok(hash)
            }
            Some(hash) => {
                warn!(%hash, "persisted sync-checkpoint not in block index, resetting");
                self.reset_locked(&mut state, chain)
            }
            None => {
                debug!("no persisted sync-checkpoint, resetting");
                self.reset_locked(&mut state, chain)
            }
        }
    }

    /// Persist `hash` as the sync-checkpoint, then adopt it in memory
    pub fn write_sync_checkpoint(&self, hash: &Hash) -> Result<(), CheckpointError> {
        let mut state = self.state.lock();
        self.write_locked(&mut state, *hash)
    }

    /// Whether `hash` may become the sync-checkpoint: it must descend from
    /// (or be) the current one. Permissive mode accepts anything.
    pub fn validate_sync_checkpoint<C: ChainIndex + ?Sized>(&self, chain: &C, hash: &Hash) -> bool {
        let mut state = self.state.lock();
        match self.validate_locked(&mut state, chain, hash) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(%hash, error = %e, "sync-checkpoint validation failed");
                false
            }
        }
    }

    /// Handle a checkpoint received from `from` (or issued locally when
    /// `from` is `None`).
    pub fn process_sync_checkpoint<C: ChainIndex + ?Sized>(
        &self,
        chain: &mut C,
        message: &CheckpointMessage,
        from: Option<&mut dyn PeerConnection>,
    ) -> Result<SyncOutcome, CheckpointError> {
        let hash = message.checkpoint_hash();

        if !message.verify_signature(&self.params.master_pubkey) {
            self.state.lock().invalid_checkpoint = hash;
            warn!(%hash, "checkpoint signature invalid");
            return Err(CheckpointError::InvalidSignature(hash));
        }

        let mut state = self.state.lock();
        self.process_locked(&mut state, chain, message, from)
    }

    /// Promote the pending checkpoint once its block is known. Returns
    /// whether a promotion happened.
    pub fn accept_pending_sync_checkpoint<'a, C, P, I>(
        &self,
        chain: &mut C,
        peers: I,
    ) -> Result<bool, CheckpointError>
    where
        C: ChainIndex + ?Sized,
        P: PeerConnection + 'a,
        I: IntoIterator<Item = &'a mut P>,
    {
        let mut state = self.state.lock();
        let pending = state.pending_checkpoint;
        if pending.is_zero() || !chain.contains(&pending) {
            return Ok(false);
        }

        match self.validate_locked(&mut state, chain, &pending) {
            Ok(true) => {}
            Ok(false) => {
                debug!(%pending, "pending checkpoint superseded");
                state.clear_pending();
                return Ok(false);
            }
            Err(e) => {
                warn!(%pending, error = %e, "pending checkpoint rejected");
                state.clear_pending();
                return Ok(false);
            }
        }

        self.activate_locked(&mut state, chain, pending)?;

        let message = std::mem::take(&mut state.pending_message);
        if !message.is_null() {
            state.checkpoint_message = message;
        }
        state.clear_pending();
        info!(hash = %pending, "pending sync-checkpoint accepted");

        let relayed = Self::relay_locked(&state, peers);
        if relayed > 0 {
            debug!(hash = %pending, peers = relayed, "relayed sync-checkpoint");
        }
        Ok(true)
    }

    /// Whether a block at `parent.height + 1` with hash `block_hash` may be
    /// accepted without crossing the sync-checkpoint. Advisory mode still
    /// refuses the block but records a warning.
    pub fn check_sync<C: ChainIndex + ?Sized>(
        &self,
        chain: &C,
        block_hash: &Hash,
        parent: &BlockIndexEntry,
    ) -> bool {
        let mut state = self.state.lock();
        if !state.mode.enforces() {
            return true;
        }

        let Some(sync) = chain.get(&state.sync_checkpoint) else {
            error!(hash = %state.sync_checkpoint, "block index missing for sync-checkpoint");
            return false;
        };
        let height = parent.height + 1;

        let passes = if height > sync.height {
            // Only descendants of the sync-checkpoint pass
            match chain.ancestor(parent, sync.height) {
                Ok(ancestor) => ancestor.hash == sync.hash,
                Err(e) => {
                    error!(error = %e, "check_sync ancestry walk failed");
                    return false;
                }
            }
        } else if height == sync.height {
            *block_hash == sync.hash
        } else {
            chain.contains(block_hash)
        };

        if !passes {
            if state.mode == CheckpointMode::Advisory {
                warn!(block = %block_hash, height, sync = %sync.hash, "block conflicts with sync-checkpoint");
                state.warning = Some(format!(
                    "block {} at height {} conflicts with sync-checkpoint {}",
                    block_hash, height, sync.hash
                ));
            } else {
                debug!(block = %block_hash, height, sync = %sync.hash, "block refused by sync-checkpoint");
            }
        }
        passes
    }

    pub fn wanted_by_pending_sync_checkpoint(&self, hash: &Hash) -> bool {
        let state = self.state.lock();
        !state.pending_checkpoint.is_zero() && state.pending_checkpoint == *hash
    }

    /// Re-derive the sync-checkpoint from the best chain and persist it
    pub fn reset_sync_checkpoint<C: ChainIndex + ?Sized>(&self, chain: &C) -> Result<Hash, CheckpointError> {
        let mut state = self.state.lock();
        self.reset_locked(&mut state, chain)
    }

    /// Best checkpoint reachable on the current best chain: the higher of
    /// the newest hardened checkpoint and the current sync-checkpoint, or
    /// genesis when neither is on the main chain.
    pub fn auto_select_sync_checkpoint<C: ChainIndex + ?Sized>(&self, chain: &C) -> Hash {
        let state = self.state.lock();
        self.auto_select_locked(&state, chain)
    }

    /// Newest block at least `AUTO_CHECKPOINT_DEPTH` deep and
    /// `CHECKPOINT_MAX_SPAN` older than the best block
    pub fn auto_checkpoint_candidate<C: ChainIndex + ?Sized>(&self, chain: &C) -> BlockIndexEntry {
        let best = chain.best();
        let mut entry = best;
        while entry.time + CHECKPOINT_MAX_SPAN > best.time
            || entry.height + AUTO_CHECKPOINT_DEPTH > best.height
        {
            match chain.get(&entry.prev_hash) {
                Some(prev) => entry = prev,
                None => break,
            }
        }
        entry
    }

    /// Request the pending checkpoint's block from `peer` if it is still
    /// missing
    pub fn ask_for_pending_sync_checkpoint<C: ChainIndex + ?Sized>(
        &self,
        chain: &C,
        peer: &mut dyn PeerConnection,
    ) {
        let state = self.state.lock();
        let pending = state.pending_checkpoint;
        if !pending.is_zero() && !chain.contains(&pending) {
            debug!(%pending, "asking peer for pending checkpoint block");
            peer.push_message(Message::GetData(vec![InvItem::block(pending)]));
        }
    }

    /// Install the checkpoint master private key. The key must match the
    /// network's master public key and produce a verifiable trial signature.
    pub fn set_checkpoint_key(&self, hex: &str) -> Result<(), CheckpointError> {
        let key = CheckpointKey::from_hex(hex)?;
        if key.public_key() != self.params.master_pubkey {
            return Err(CheckpointError::KeyMismatch);
        }

        let trial = CheckpointMessage::sign(self.params.genesis_hash, &key)?;
        if !trial.verify_signature(&self.params.master_pubkey) {
            return Err(CheckpointError::KeyMismatch);
        }

        self.state.lock().signing_key = Some(key);
        info!("checkpoint master key installed");
        Ok(())
    }

    pub fn has_checkpoint_key(&self) -> bool {
        self.state.lock().signing_key.is_some()
    }

    /// Sign a checkpoint for `hash`, apply it locally and relay it. Returns
    /// the number of peers it was sent to.
    pub fn send_sync_checkpoint<'a, C, P, I>(
        &self,
        chain: &mut C,
        hash: &Hash,
        peers: I,
    ) -> Result<usize, CheckpointError>
    where
        C: ChainIndex + ?Sized,
        P: PeerConnection + 'a,
        I: IntoIterator<Item = &'a mut P>,
    {
        let mut state = self.state.lock();
        let key = state
            .signing_key
            .as_ref()
            .ok_or(CheckpointError::MissingPrivateKey)?;
        let message = CheckpointMessage::sign(*hash, key)?;

        match self.process_locked(&mut state, chain, &message, None)? {
            SyncOutcome::Ignored => {
                warn!(%hash, "failed to process own checkpoint");
                return Err(CheckpointError::Rejected(*hash));
            }
            SyncOutcome::Pending => {
                state.pending_message = message.clone();
            }
            SyncOutcome::Accepted | SyncOutcome::AlreadyActive => {}
        }

        let mut sent = 0;
        for peer in peers {
            if message.relay_to(peer) {
                sent += 1;
            }
        }
        info!(%hash, peers = sent, "sent sync-checkpoint");
        Ok(sent)
    }

    /// Master node only: checkpoint the newest sufficiently buried block
    /// when it is above the current sync-checkpoint.
    pub fn auto_send_sync_checkpoint<'a, C, P, I>(
        &self,
        chain: &mut C,
        peers: I,
    ) -> Result<Option<Hash>, CheckpointError>
    where
        C: ChainIndex + ?Sized,
        P: PeerConnection + 'a,
        I: IntoIterator<Item = &'a mut P>,
    {
        if !self.has_checkpoint_key() {
            return Err(CheckpointError::MissingPrivateKey);
        }

        let candidate = self.auto_checkpoint_candidate(chain);
        let current_height = self.last_sync_checkpoint(chain).map(|e| e.height);
        if current_height.is_some_and(|h| candidate.height <= h) {
            return Ok(None);
        }

        self.send_sync_checkpoint(chain, &candidate.hash, peers)?;
        Ok(Some(candidate.hash))
    }

    /// Sync-checkpoint buried deeper than `SYNC_CHECKPOINT_MATURITY` blocks
    /// and older than `CHECKPOINT_MAX_SPAN` relative to the best block
    pub fn is_mature_sync_checkpoint<C: ChainIndex + ?Sized>(&self, chain: &C) -> bool {
        let Some(sync) = self.last_sync_checkpoint(chain) else {
            return false;
        };
        is_mature(&sync, &chain.best())
    }

    /// Send the active checkpoint message to peers that have not seen it
    pub fn relay_sync_checkpoint<'a, P, I>(&self, peers: I) -> usize
    where
        P: PeerConnection + 'a,
        I: IntoIterator<Item = &'a mut P>,
    {
        let state = self.state.lock();
        Self::relay_locked(&state, peers)
    }

    pub fn status<C: ChainIndex + ?Sized>(&self, chain: &C) -> CheckpointStatus {
        let state = self.state.lock();
        let sync = chain.get(&state.sync_checkpoint);
        let mature = sync.is_some_and(|s| is_mature(&s, &chain.best()));

        CheckpointStatus {
            synccheckpoint: state.sync_checkpoint,
            height: sync.map(|s| s.height),
            timestamp: sync.map(|s| s.time),
            mode: state.mode,
            pending: (!state.pending_checkpoint.is_zero()).then_some(state.pending_checkpoint),
            invalid: (!state.invalid_checkpoint.is_zero()).then_some(state.invalid_checkpoint),
            mature,
            warning: state.warning.clone(),
            master: state.signing_key.is_some(),
        }
    }

    fn process_locked<C: ChainIndex + ?Sized>(
        &self,
        state: &mut SyncState,
        chain: &mut C,
        message: &CheckpointMessage,
        from: Option<&mut dyn PeerConnection>,
    ) -> Result<SyncOutcome, CheckpointError> {
        let hash = message.checkpoint_hash();

        if hash == state.sync_checkpoint {
            if state.pending_checkpoint == hash {
                state.clear_pending();
            }
            return Ok(SyncOutcome::AlreadyActive);
        }

        if !chain.contains(&hash) {
            // Keep it until the checkpointed chain arrives
            state.pending_checkpoint = hash;
            state.pending_message = message.clone();
            info!(%hash, "sync-checkpoint pending, block not yet known");

            if let Some(peer) = from {
                let best = chain.best();
                let locator = build_block_locator(best.height, |h| chain.main_chain_hash(h));
                peer.push_message(Message::GetBlocks(GetBlocksMessage {
                    block_locators: locator,
                    stop_hash: hash,
                }));
                peer.push_message(Message::GetData(vec![InvItem::block(hash)]));
            }
            return Ok(SyncOutcome::Pending);
        }

        if !self.validate_locked(state, chain, &hash)? {
            debug!(%hash, "ignoring older sync-checkpoint");
            return Ok(SyncOutcome::Ignored);
        }

        self.activate_locked(state, chain, hash)?;

        state.checkpoint_message = message.clone();
        state.clear_pending();
        if let Some(peer) = from {
            peer.set_checkpoint_known(hash);
        }
        info!(%hash, "sync-checkpoint accepted");
        Ok(SyncOutcome::Accepted)
    }

    /// Ok(false) for an older candidate consistent with the current
    /// checkpoint; Err for conflicts and unknown blocks.
    fn validate_locked<C: ChainIndex + ?Sized>(
        &self,
        state: &mut SyncState,
        chain: &C,
        hash: &Hash,
    ) -> Result<bool, CheckpointError> {
        if !state.mode.enforces() {
            return Ok(true);
        }

        let current = chain
            .get(&state.sync_checkpoint)
            .ok_or(CheckpointError::MissingBlockIndex(state.sync_checkpoint))?;
        let received = chain
            .get(hash)
            .ok_or(CheckpointError::MissingBlockIndex(*hash))?;

        let consistent = if received.height <= current.height {
            // Current checkpoint must descend from the received one
            let at_height = chain
                .ancestor(&current, received.height)
                .map_err(|_| CheckpointError::MissingBlockIndex(current.hash))?;
            if at_height.hash == received.hash {
                return Ok(received.hash == current.hash);
            }
            false
        } else {
            let at_height = chain
                .ancestor(&received, current.height)
                .map_err(|_| CheckpointError::MissingBlockIndex(received.hash))?;
            at_height.hash == current.hash
        };

        if consistent {
            return Ok(true);
        }

        state.invalid_checkpoint = *hash;
        warn!(candidate = %hash, current = %current.hash, mode = %state.mode, "sync-checkpoint conflict");

        match state.mode {
            CheckpointMode::Strict => {
                let selected = self.auto_select_locked(state, chain);
                if selected != state.sync_checkpoint {
                    match self.write_locked(state, selected) {
                        Ok(()) => warn!(%selected, "sync-checkpoint conflict resolved by reset"),
                        Err(e) => error!(%selected, error = %e, "failed to persist resolved checkpoint"),
                    }
                }
            }
            CheckpointMode::Advisory => {
                state.warning = Some(format!(
                    "checkpoint {} conflicts with sync-checkpoint {}",
                    hash, current.hash
                ));
            }
            CheckpointMode::Permissive => {}
        }

        Err(CheckpointError::Conflict {
            candidate: *hash,
            current: current.hash,
        })
    }

    /// Move the best chain onto `hash` if needed, then persist it
    fn activate_locked<C: ChainIndex + ?Sized>(
        &self,
        state: &mut SyncState,
        chain: &mut C,
        hash: Hash,
    ) -> Result<(), CheckpointError> {
        if !chain.is_in_main_chain(&hash) {
            if let Err(e) = chain.set_best_chain(&hash) {
                state.invalid_checkpoint = hash;
                error!(%hash, error = %e, "failed to switch best chain to checkpoint");
                return Err(CheckpointError::Reorganize(hash, e));
            }
            info!(%hash, "best chain switched to checkpointed branch");
        }
        self.write_locked(state, hash)
    }

    fn write_locked(&self, state: &mut SyncState, hash: Hash) -> Result<(), CheckpointError> {
        self.store.write_sync_checkpoint(&hash)?;
        state.sync_checkpoint = hash;
        Ok(())
    }

    fn reset_locked<C: ChainIndex + ?Sized>(
        &self,
        state: &mut SyncState,
        chain: &C,
    ) -> Result<Hash, CheckpointError> {
        // Newest hardened checkpoint not yet received becomes pending
        if let Some((_, newest)) = self.params.hardened_checkpoints.iter().next_back() {
            if !chain.contains(newest) {
                state.pending_checkpoint = *newest;
                state.pending_message = CheckpointMessage::null();
            }
        }

        let selected = self.auto_select_locked(state, chain);
        self.write_locked(state, selected)?;
        info!(hash = %selected, "sync-checkpoint reset");
        Ok(selected)
    }

    fn auto_select_locked<C: ChainIndex + ?Sized>(&self, state: &SyncState, chain: &C) -> Hash {
        let hardened = self
            .params
            .hardened_checkpoints
            .values()
            .rev()
            .filter_map(|hash| chain.get(hash))
            .find(|entry| chain.is_in_main_chain(&entry.hash));
        let current = chain
            .get(&state.sync_checkpoint)
            .filter(|entry| chain.is_in_main_chain(&entry.hash));

        match (hardened, current) {
            (Some(h), Some(c)) if c.height > h.height => c.hash,
            (Some(h), _) => h.hash,
            (None, Some(c)) => c.hash,
            (None, None) => self.params.genesis_hash,
        }
    }

    fn relay_locked<'a, P, I>(state: &SyncState, peers: I) -> usize
    where
        P: PeerConnection + 'a,
        I: IntoIterator<Item = &'a mut P>,
    {
        if state.checkpoint_message.is_null() {
            return 0;
        }
        let mut sent = 0;
        for peer in peers {
            if state.checkpoint_message.relay_to(peer) {
                sent += 1;
            }
        }
        sent
    }
}
