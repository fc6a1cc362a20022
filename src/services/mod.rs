//! # Services Module
//!
//! External-facing seams of the wallet core.
//!
//! ## Components
//!
//! - **External contracts**: traits for storage, the liveness oracle, the
//!   fee source and the broadcaster
//! - **Prover Client**: HTTP client for the external proving service

pub mod external;
pub mod prover;

pub use external::{Broadcaster, FeeEstimates, FeeSource, LivenessOracle, Storage};
pub use prover::{ProveOutcome, ProvePayload, ProverClient};
