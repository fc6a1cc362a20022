//! # Charms Wallet Core
//!
//! Transaction engine for a client-side Bitcoin wallet supporting the
//! charms asset-transfer protocol: spendability classification, coin
//! selection, BIP86 key derivation with Taproot (Schnorr) signing, spell
//! composition, a fallback witness CBOR decoder and a retrying prover
//! client.
//!
//! Persistence, chain access and broadcast are delegated to collaborators
//! behind the trait contracts in [`services::external`].

pub mod builder;
pub mod cbor_extract;
pub mod classify;
pub mod config;
pub mod error;
pub mod network;
pub mod selection;
pub mod services;
pub mod signer;
pub mod spell;
pub mod types;

// Re-export commonly used types
pub use error::{WalletError, WalletResult};
pub use network::NetworkParams;
pub use selection::CoinSelector;
pub use services::prover::{ProveOutcome, ProvePayload, ProverClient};
pub use signer::TaprootSigner;
pub use spell::{compose_transfer_spell, Spell};
pub use types::{
    AddressEntry, Charm, CharmAmount, SignedTransaction, Spendability, TransactionPlan, Utxo,
    UtxoId, UtxoLockSet,
};
