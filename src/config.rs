//! # Configuration Constants
//!
//! This module contains the policy and protocol constants used throughout
//! the wallet core.

/// Spendability and dust policy
pub mod policy {
    /// Bitcoin dust threshold in satoshis. Change below this value is never
    /// emitted; 546-sat outputs are treated as potential protocol markers.
    pub const DUST_THRESHOLD_SATS: u64 = 546;

    /// Exact output values reserved as potential charm outputs.
    ///
    /// This is a temporary safety filter: the false-positive behavior against
    /// legitimate same-value payments is unverified, so the values are kept
    /// exactly as observed rather than tightened or loosened.
    pub const POTENTIAL_CHARM_VALUES: [u64; 4] = [1000, 330, 333, 777];

    /// Satoshi value carried by each spell output, conservatively above the
    /// dust threshold.
    pub const SPELL_OUTPUT_SATS: u64 = 1000;

    /// Maximum distance (in sats) between a requested amount and the
    /// maximum sendable amount for the request to be routed to sweep mode.
    pub const SWEEP_TOLERANCE_SATS: u64 = 10;

    /// Maximum number of charm UTXOs combined into one spell, a prover
    /// constraint.
    pub const MAX_SPELL_INPUT_UTXOS: usize = 16;
}

/// Transaction fee estimation model
///
/// Virtual sizes are conservative per-input/per-output estimates; the fee is
/// `ceil(size * rate)` with a fixed floor.
pub mod fees {
    /// Virtual size of a legacy P2PKH input in vbytes
    pub const P2PKH_INPUT_VBYTES: u64 = 148;

    /// Virtual size of a Taproot key-spend input in vbytes
    pub const TAPROOT_INPUT_VBYTES: u64 = 57;

    /// Virtual size of an output in vbytes
    pub const OUTPUT_VBYTES: u64 = 34;

    /// Fixed transaction overhead in vbytes
    pub const TX_OVERHEAD_VBYTES: u64 = 10;

    /// Minimum fee in satoshis regardless of computed size
    pub const MIN_FEE_SATS: u64 = 200;
}

/// Prover endpoint retry behavior
pub mod prover {
    /// Progressive delay schedule in milliseconds; attempts past the end of
    /// the schedule reuse the last entry.
    pub const RETRY_DELAYS_MS: [u64; 6] = [3_000, 10_000, 15_000, 20_000, 25_000, 30_000];

    /// Jitter applied to each delay (fraction of the base delay)
    pub const RETRY_JITTER_RATIO: f64 = 0.1;

    /// Lower bound on any retry delay in milliseconds
    pub const MIN_RETRY_DELAY_MS: u64 = 1_000;
}

/// BIP86 key derivation
pub mod derivation {
    /// BIP86 purpose level (Taproot single-key accounts)
    pub const BIP86_PURPOSE: u32 = 86;

    /// Account index; the wallet manages a single BIP86 account
    pub const ACCOUNT: u32 = 0;
}

/// Bounds for the fallback witness CBOR scanner
///
/// The scanner runs over attacker-influenced on-chain data, so every
/// dimension of the scan is capped.
pub mod cbor {
    /// Maximum number of byte offsets tried when scanning a witness item
    pub const MAX_SCAN_BYTES: usize = 65_536;

    /// Maximum nesting depth accepted while decoding
    pub const MAX_DEPTH: usize = 32;

    /// Maximum number of decoded items per scan attempt
    pub const MAX_ITEMS: usize = 16_384;

    /// Minimum witness item length considered a spell candidate
    pub const MIN_SPELL_WITNESS_LEN: usize = 600;

    /// Minimum number of comma-separated values for the raw-text fallback
    pub const FALLBACK_MIN_VALUES: usize = 64;
}
