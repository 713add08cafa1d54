//! Proof-of-stake kernel search
//!
//! For a coin input, scans a window of candidate timestamps for a kernel
//! hash that meets the input's coin-day-weighted target.
//!
//! The kernel hash of a timestamp is `SHA256(SHA256(seed || timestamp))`,
//! with the timestamp as 4 little-endian bytes and the result read as a
//! little-endian 256-bit integer. This is a consensus rule.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

use super::Cancellation;
use crate::consensus::StakeTarget;
use crate::constants::KERNEL_SEED_LEN;
use crate::crypto::Hash;

/// Fixed kernel prefix: stake modifier followed by the input's metadata
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KernelSeed(pub [u8; KERNEL_SEED_LEN]);

impl KernelSeed {
    pub fn from_bytes(bytes: [u8; KERNEL_SEED_LEN]) -> Self {
        KernelSeed(bytes)
    }

    /// `None` unless `bytes` is exactly the seed length
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(KernelSeed)
    }

    pub fn as_bytes(&self) -> &[u8; KERNEL_SEED_LEN] {
        &self.0
    }
}

impl fmt::Debug for KernelSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelSeed({})", hex::encode(self.0))
    }
}

/// A timestamp whose kernel hash meets the stake target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSolution {
    pub proof_hash: Hash,
    pub timestamp: u32,
}

/// Backward search window, scanned from `high` down to `low` (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchInterval {
    pub high: u32,
    pub low: u32,
}

impl SearchInterval {
    pub fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }
}

/// Kernel searcher for a single coin input
#[derive(Debug, Clone)]
pub struct KernelWorker {
    seed: KernelSeed,
    target_bits: u32,
    input_tx_time: u32,
    input_value: u64,
}

impl KernelWorker {
    pub fn new(seed: KernelSeed, target_bits: u32, input_tx_time: u32, input_value: u64) -> Self {
        Self {
            seed,
            target_bits,
            input_tx_time,
            input_value,
        }
    }

    /// Kernel hash for one timestamp
    pub fn kernel_hash(&self, timestamp: u32) -> Hash {
        Self::hash_from(&self.seeded_context(), timestamp)
    }

    /// Full check of a single timestamp, as a block validator would do it
    pub fn check_timestamp(&self, timestamp: u32) -> Option<KernelSolution> {
        let stake = StakeTarget::new(self.target_bits, self.input_value)?;
        let proof_hash = self.kernel_hash(timestamp);
        stake
            .is_met_by(&proof_hash, self.input_tx_time, timestamp)
            .then_some(KernelSolution {
                proof_hash,
                timestamp,
            })
    }

    /// Scan `[time_begin, time_end]` in ascending order and collect every
    /// solution. Stops early, keeping what it found, once `shutdown` fires.
    pub fn scan_forward<C: Cancellation + ?Sized>(
        &self,
        time_begin: u32,
        time_end: u32,
        shutdown: &C,
    ) -> Vec<KernelSolution> {
        let mut solutions = Vec::new();
        let Some(stake) = StakeTarget::new(self.target_bits, self.input_value) else {
            return solutions;
        };
        let max_high_word = stake.max_target_high_word();
        let ctx = self.seeded_context();

        for timestamp in time_begin..=time_end {
            if shutdown.is_cancelled() {
                debug!(timestamp, found = solutions.len(), "forward kernel scan cancelled");
                break;
            }

            if let Some(solution) = self.evaluate(&stake, max_high_word, &ctx, timestamp) {
                solutions.push(solution);
            }
        }

        solutions
    }

    /// Scan from `interval.high` down to `interval.low` and return the first
    /// (latest) solution. Returns `None` if cancelled.
    pub fn scan_backward<C: Cancellation + ?Sized>(
        &self,
        interval: SearchInterval,
        shutdown: &C,
    ) -> Option<KernelSolution> {
        let stake = StakeTarget::new(self.target_bits, self.input_value)?;
        let max_high_word = stake.max_target_high_word();
        let ctx = self.seeded_context();

        for timestamp in (interval.low..=interval.high).rev() {
            if shutdown.is_cancelled() {
                debug!(timestamp, "backward kernel scan cancelled");
                return None;
            }

            if let Some(solution) = self.evaluate(&stake, max_high_word, &ctx, timestamp) {
                return Some(solution);
            }
        }

        None
    }

    /// Forward scan split across `threads` scoped workers. Each worker owns
    /// its hashing context; results are merged in timestamp order.
    pub fn scan_forward_parallel<C: Cancellation + Sync + ?Sized>(
        &self,
        time_begin: u32,
        time_end: u32,
        threads: usize,
        shutdown: &C,
    ) -> Vec<KernelSolution> {
        if time_begin > time_end {
            return Vec::new();
        }

        // Never more workers than timestamps
        let total = time_end as u64 - time_begin as u64 + 1;
        let threads = (threads.max(1) as u64).min(total);
        let chunk = total.div_ceil(threads);

        let ranges: Vec<(u32, u32)> = (0..threads)
            .map(|i| time_begin as u64 + i * chunk)
            .filter(|lo| *lo <= time_end as u64)
            .map(|lo| (lo as u32, (lo + chunk - 1).min(time_end as u64) as u32))
            .collect();

        let mut solutions: Vec<KernelSolution> = std::thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .iter()
                .map(|&(lo, hi)| scope.spawn(move || self.scan_forward(lo, hi, shutdown)))
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(found) => found,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        solutions.sort_by_key(|s| s.timestamp);
        solutions
    }

    fn seeded_context(&self) -> Sha256 {
        let mut ctx = Sha256::new();
        ctx.update(self.seed.0);
        ctx
    }

    fn hash_from(seeded: &Sha256, timestamp: u32) -> Hash {
        let mut ctx = seeded.clone();
        ctx.update(timestamp.to_le_bytes());
        let first = ctx.finalize();
        Hash(Sha256::digest(first).into())
    }

    fn evaluate(
        &self,
        stake: &StakeTarget,
        max_high_word: u32,
        seeded: &Sha256,
        timestamp: u32,
    ) -> Option<KernelSolution> {
        let proof_hash = Self::hash_from(seeded, timestamp);

        // Coarse filter only; the weighted comparison below decides.
        if proof_hash.high_word() > max_high_word {
            return None;
        }

        stake
            .is_met_by(&proof_hash, self.input_tx_time, timestamp)
            .then_some(KernelSolution {
                proof_hash,
                timestamp,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COIN, ONE_DAY};
    use crate::crypto::sha256;
    use crate::minting::ShutdownSignal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cancels once it has been polled `polls` times
    struct CancelAfter(AtomicUsize);

    impl CancelAfter {
        fn new(polls: usize) -> Self {
            Self(AtomicUsize::new(polls))
        }
    }

    impl Cancellation for CancelAfter {
        fn is_cancelled(&self) -> bool {
            self.0
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }
    }

    // Loose enough that a few percent of timestamps pass
    const EASY_BITS: u32 = 0x2000ffff;
    const IMPOSSIBLE_BITS: u32 = 0x01000000;

    fn worker(bits: u32) -> KernelWorker {
        let seed = KernelSeed::from_bytes([7u8; KERNEL_SEED_LEN]);
        KernelWorker::new(seed, bits, 0, COIN)
    }

    fn window() -> (u32, u32) {
        let start = 10 * ONE_DAY as u32;
        (start, start + 1500)
    }

    #[test]
    fn test_kernel_hash_is_chained_sha256() {
        let w = worker(EASY_BITS);
        let mut preimage = [7u8; KERNEL_SEED_LEN + 4].to_vec();
        preimage[KERNEL_SEED_LEN..].copy_from_slice(&1234u32.to_le_bytes());

        let first = sha256(&preimage);
        assert_eq!(w.kernel_hash(1234), sha256(&first.0));
    }

    #[test]
    fn test_forward_scan_finds_checked_solutions() {
        let w = worker(EASY_BITS);
        let (begin, end) = window();
        let found = w.scan_forward(begin, end, &ShutdownSignal::new());

        assert!(!found.is_empty());
        assert!(found.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
        for solution in &found {
            assert_eq!(w.check_timestamp(solution.timestamp), Some(*solution));
        }

        let misses = (begin..=end)
            .filter(|t| !found.iter().any(|s| s.timestamp == *t))
            .take(50);
        for t in misses {
            assert_eq!(w.check_timestamp(t), None);
        }
    }

    #[test]
    fn test_backward_scan_returns_latest() {
        let w = worker(EASY_BITS);
        let (begin, end) = window();
        let signal = ShutdownSignal::new();

        let forward = w.scan_forward(begin, end, &signal);
        let backward = w.scan_backward(SearchInterval::new(end, begin), &signal);

        assert_eq!(backward, forward.last().copied());
    }

    #[test]
    fn test_impossible_target_finds_nothing() {
        let w = worker(IMPOSSIBLE_BITS);
        let (begin, end) = window();
        let signal = ShutdownSignal::new();

        assert!(w.scan_forward(begin, end, &signal).is_empty());
        assert_eq!(w.scan_backward(SearchInterval::new(end, begin), &signal), None);
    }

    #[test]
    fn test_negative_bits_find_nothing() {
        let w = worker(0x04923456);
        assert!(w.scan_forward(0, 100, &ShutdownSignal::new()).is_empty());
    }

    #[test]
    fn test_young_input_has_no_weight() {
        // Held less than a day: zero coin-day weight, zero target
        let seed = KernelSeed::from_bytes([1u8; KERNEL_SEED_LEN]);
        let w = KernelWorker::new(seed, EASY_BITS, 1_000_000, COIN);
        let found = w.scan_forward(1_000_000, 1_000_000 + 2000, &ShutdownSignal::new());
        assert!(found.is_empty());
    }

    #[test]
    fn test_pre_cancelled_scan_returns_immediately() {
        let w = worker(EASY_BITS);
        let signal = ShutdownSignal::new();
        signal.trigger();

        assert!(w.scan_forward(0, u32::MAX, &signal).is_empty());
        assert_eq!(w.scan_backward(SearchInterval::new(u32::MAX, 0), &signal), None);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let w = worker(EASY_BITS);
        let (begin, end) = window();
        let signal = ShutdownSignal::new();

        let sequential = w.scan_forward(begin, end, &signal);
        for threads in [1, 3, 4, 7] {
            assert_eq!(w.scan_forward_parallel(begin, end, threads, &signal), sequential);
        }
    }

    #[test]
    fn test_parallel_threads_capped_by_window() {
        let w = worker(EASY_BITS);
        let signal = ShutdownSignal::new();
        let sequential = w.scan_forward(100, 110, &signal);

        assert_eq!(w.scan_forward_parallel(100, 110, usize::MAX, &signal), sequential);
        assert_eq!(w.scan_forward_parallel(100, 110, 11, &signal), sequential);
        assert_eq!(w.scan_forward_parallel(7, 7, 64, &signal), w.scan_forward(7, 7, &signal));
    }

    #[test]
    fn test_forward_scan_stops_at_cancellation_point() {
        // A thousand coins two days old clear any target, so every timestamp hits
        let seed = KernelSeed::from_bytes([3u8; KERNEL_SEED_LEN]);
        let w = KernelWorker::new(seed, EASY_BITS, 0, 1000 * COIN);
        let begin = 2 * ONE_DAY as u32;

        let found = w.scan_forward(begin, u32::MAX, &CancelAfter::new(5));
        let stamps: Vec<u32> = found.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, (begin..begin + 5).collect::<Vec<_>>());

        assert!(w.scan_forward(begin, begin, &CancelAfter::new(0)).is_empty());
    }

    #[test]
    fn test_backward_scan_cancelled_mid_scan() {
        let w = worker(IMPOSSIBLE_BITS);
        let cancel = CancelAfter::new(3);

        assert_eq!(w.scan_backward(SearchInterval::new(u32::MAX, 0), &cancel), None);
        assert!(cancel.is_cancelled());

        let hit = worker(EASY_BITS);
        let (begin, end) = window();
        let latest = hit.scan_backward(SearchInterval::new(end, begin), &ShutdownSignal::new());
        assert!(latest.is_some());
        assert_eq!(
            hit.scan_backward(SearchInterval::new(end, begin), &CancelAfter::new(0)),
            None
        );
    }

    #[test]
    fn test_single_timestamp_window() {
        let w = worker(EASY_BITS);
        let (begin, end) = window();
        let signal = ShutdownSignal::new();
        let hit = w.scan_forward(begin, end, &signal)[0];

        assert_eq!(w.scan_forward(hit.timestamp, hit.timestamp, &signal), vec![hit]);
        assert_eq!(
            w.scan_backward(SearchInterval::new(hit.timestamp, hit.timestamp), &signal),
            Some(hit)
        );
        assert!(w.scan_forward(end, begin, &signal).is_empty());
        assert!(w.scan_forward_parallel(end, begin, 4, &signal).is_empty());
    }

    #[test]
    fn test_seed_from_slice_checks_length() {
        assert!(KernelSeed::from_slice(&[0u8; 23]).is_none());
        assert!(KernelSeed::from_slice(&[0u8; 24]).is_some());
    }
}
