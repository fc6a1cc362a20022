//! # Error Types for the Charms Wallet Core
//!
//! This module provides comprehensive error handling for coin selection,
//! key derivation, transaction signing, spell composition and prover
//! communication.

use thiserror::Error;

/// Main error type for all wallet core operations
#[derive(Debug, Error)]
pub enum WalletError {
    /// Coin selection cannot cover the requested amount plus fees
    #[error("Insufficient funds: required {required} sats, available {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    /// A referenced UTXO is missing, malformed or unknown to the wallet
    #[error("Invalid UTXO {utxo_id}: {message}")]
    InvalidUtxo { utxo_id: String, message: String },

    /// The derived key does not reproduce the claimed address.
    /// Always fatal, never retried.
    #[error("Derived key does not match address {address} (derived {derived})")]
    KeyMismatch { address: String, derived: String },

    /// The Taproot tweak produced a degenerate scalar
    #[error("Taproot tweak resulted in an invalid private key")]
    InvalidTweak,

    /// Structural defect in a spell or prover payload
    #[error("Spell validation failed: {message}")]
    SpellValidation { message: String },

    /// A charm transfer asks for more than the charm holds
    #[error("Insufficient charm amount: transfer {transfer} exceeds balance {total}")]
    InsufficientCharmAmount { transfer: u64, total: u64 },

    /// Transient prover failure (5xx or network); retried with backoff
    #[error("Prover request failed (transient): {message}")]
    ProverTransient { message: String },

    /// Terminal prover failure (4xx or malformed response); surfaced immediately
    #[error("Prover request failed: {message}")]
    ProverTerminal { message: String },

    /// A selected input was found spent after selection/signing
    #[error("Double-spend detected for input {utxo_id}")]
    DoubleSpendDetected { utxo_id: String },

    /// Address parsing and network validation errors
    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    /// BIP32 key derivation failures
    #[error("Key derivation failed: {source}")]
    Derivation {
        #[from]
        source: bitcoin::bip32::Error,
    },

    /// Mnemonic parsing failures
    #[error("Invalid mnemonic: {source}")]
    Mnemonic {
        #[from]
        source: bip39::Error,
    },

    /// Errors during transaction construction or encoding
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    /// Failures reported by the storage collaborator
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Network request failures (prover endpoint, oracles)
    #[error("Network request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON processing error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Result type alias for wallet core operations
pub type WalletResult<T> = Result<T, WalletError>;

impl WalletError {
    /// Create an invalid-UTXO error with context
    pub fn invalid_utxo(utxo_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUtxo {
            utxo_id: utxo_id.into(),
            message: message.into(),
        }
    }

    /// Create a spell validation error with a message
    pub fn spell(message: impl Into<String>) -> Self {
        Self::SpellValidation {
            message: message.into(),
        }
    }

    /// Create a transaction error with a message
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a storage error with a message
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Check if this error is retryable (transient network/prover issues)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::ProverTransient { .. } | WalletError::Network { .. }
        )
    }

    /// Check if this error indicates a key or funds integrity issue
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            WalletError::KeyMismatch { .. }
                | WalletError::InvalidTweak
                | WalletError::DoubleSpendDetected { .. }
        )
    }
}
