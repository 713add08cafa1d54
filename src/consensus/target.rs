//! Stake target arithmetic
//!
//! Compact difficulty decoding and coin-day weighting for proof-of-stake.
//! Every division truncates; the order of multiplications and divisions is
//! consensus-critical and must not be rearranged.

use primitive_types::{U256, U512};

use crate::constants::{COIN, ONE_DAY, STAKE_MAX_AGE};
use crate::crypto::Hash;

/// Sign bit of the compact mantissa
const COMPACT_SIGN_BIT: u32 = 0x0080_0000;

/// Mantissa mask of the compact representation
const COMPACT_MANTISSA_MASK: u32 = 0x007F_FFFF;

/// Convert compact difficulty to a 256-bit target.
///
/// Returns `None` for encodings that are negative or do not fit in 256
/// bits; no hash can satisfy such a target.
pub fn compact_to_target(compact: u32) -> Option<U256> {
    let size = compact >> 24;
    let mut mantissa = compact & COMPACT_MANTISSA_MASK;

    if mantissa != 0 && compact & COMPACT_SIGN_BIT != 0 {
        return None;
    }

    if size <= 3 {
        mantissa >>= 8 * (3 - size);
        return Some(U256::from(mantissa));
    }

    let overflow = mantissa != 0
        && (size > 34 || (mantissa > 0xff && size > 33) || (mantissa > 0xffff && size > 32));
    if overflow {
        return None;
    }

    Some(U256::from(mantissa) << (8 * (size - 3) as usize))
}

/// Convert a 256-bit target to its compact representation
pub fn target_to_compact(target: U256) -> u32 {
    let mut size = ((target.bits() + 7) / 8) as u32;
    let mut compact = if size <= 3 {
        target.low_u32() << (8 * (3 - size))
    } else {
        (target >> (8 * (size - 3) as usize)).low_u32()
    };

    // Keep the mantissa positive
    if compact & COMPACT_SIGN_BIT != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | (size << 24)
}

/// Seconds of stake age credited to an input, capped at the maximum stake
/// age. A timestamp before the input's own time earns nothing.
pub fn stake_weight(input_tx_time: u32, timestamp: u32) -> u64 {
    (timestamp as u64)
        .saturating_sub(input_tx_time as u64)
        .min(STAKE_MAX_AGE)
}

/// Coin-day weight: `value * weight / COIN / ONE_DAY`, truncating at each
/// division step.
pub fn coin_day_weight(value: u64, weight: u64) -> U256 {
    U256::from(value) * U256::from(weight) / U256::from(COIN) / U256::from(ONE_DAY)
}

/// Target a stake of the given coin-day weight must meet
pub fn target_for_stake(coin_day_weight: U256, target_per_coin_day: U256) -> U512 {
    coin_day_weight.full_mul(target_per_coin_day)
}

/// Weighted stake target for one coin input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeTarget {
    target_per_coin_day: U256,
    value: u64,
}

impl StakeTarget {
    /// Build from compact bits and the input value. `None` when the bits
    /// do not decode to a usable target.
    pub fn new(target_bits: u32, value: u64) -> Option<Self> {
        compact_to_target(target_bits).map(|target_per_coin_day| Self {
            target_per_coin_day,
            value,
        })
    }

    pub fn target_per_coin_day(&self) -> U256 {
        self.target_per_coin_day
    }

    /// Loosest target this input can ever reach, i.e. at maximum stake age.
    /// Saturates at 2^256 - 1.
    pub fn max_target(&self) -> U256 {
        let full = U512::from(self.target_per_coin_day)
            * U512::from(self.value)
            * U512::from(STAKE_MAX_AGE)
            / U512::from(COIN)
            / U512::from(ONE_DAY);
        U256::try_from(full).unwrap_or(U256::MAX)
    }

    /// Most significant 32-bit word of [`StakeTarget::max_target`]
    pub fn max_target_high_word(&self) -> u32 {
        (self.max_target() >> 224).low_u32()
    }

    /// Coin-day weight of this input as of `timestamp`
    pub fn coin_day_weight_at(&self, input_tx_time: u32, timestamp: u32) -> U256 {
        coin_day_weight(self.value, stake_weight(input_tx_time, timestamp))
    }

    /// Exact target for a kernel stamped at `timestamp`
    pub fn target_at(&self, input_tx_time: u32, timestamp: u32) -> U512 {
        target_for_stake(
            self.coin_day_weight_at(input_tx_time, timestamp),
            self.target_per_coin_day,
        )
    }

    /// Full weighted comparison: `proof_hash <= target`
    pub fn is_met_by(&self, proof_hash: &Hash, input_tx_time: u32, timestamp: u32) -> bool {
        U512::from(proof_hash.to_u256()) <= self.target_at(input_tx_time, timestamp)
    }
}
