//! # External Collaborator Contracts
//!
//! Trait contracts for the collaborators the core depends on but does not
//! implement: persistent storage, the UTXO liveness oracle, the fee source
//! and the broadcaster. All persistence and chain access is delegated
//! through these seams.

use crate::error::WalletResult;
use crate::network::NetworkParams;
use crate::types::{AddressEntry, Charm, Utxo, UtxoId};
use serde::Deserialize;

/// Persistent wallet storage.
///
/// The core only borrows snapshots for the duration of one operation; the
/// seed phrase is loaded once per signing call and never cached.
pub trait Storage {
    /// The wallet's seed phrase, the sole root of trust.
    fn seed_phrase(&self) -> WalletResult<String>;

    /// Every known address for the network, receive and change chains.
    fn addresses(&self, params: &NetworkParams) -> WalletResult<Vec<AddressEntry>>;

    /// All stored UTXOs created by `txid`.
    fn find_utxos_by_txid(&self, txid: &str, params: &NetworkParams) -> WalletResult<Vec<Utxo>>;

    /// All known charm records for the network.
    fn charms(&self, params: &NetworkParams) -> WalletResult<Vec<Charm>>;

    /// Remove a UTXO confirmed spent elsewhere.
    fn remove_utxo(&self, id: &UtxoId, params: &NetworkParams) -> WalletResult<()>;
}

/// Oracle answering whether a UTXO has already been spent.
pub trait LivenessOracle {
    fn is_utxo_spent(
        &self,
        txid: &str,
        vout: u32,
        params: &NetworkParams,
    ) -> impl std::future::Future<Output = WalletResult<bool>>;
}

/// Fee rate estimates in sat/vbyte, in the shape mempool-style explorers
/// return them.
#[derive(Debug, Clone, Deserialize)]
pub struct FeeEstimates {
    #[serde(rename = "fastestFee")]
    pub fastest: f64,
    #[serde(rename = "halfHourFee")]
    pub half_hour: f64,
    #[serde(rename = "hourFee")]
    pub hour: f64,
    #[serde(rename = "economyFee")]
    pub economy: f64,
    #[serde(rename = "minimumFee")]
    pub minimum: f64,
}

/// Source of current fee estimates.
pub trait FeeSource {
    fn fee_estimates(
        &self,
        params: &NetworkParams,
    ) -> impl std::future::Future<Output = WalletResult<FeeEstimates>>;
}

/// Per-transaction acceptance result from a package submission.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageTxResult {
    pub txid: String,
    pub accepted: bool,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

/// Transaction broadcaster.
pub trait Broadcaster {
    /// Broadcast one raw transaction, returning its txid.
    fn send_raw_transaction(
        &self,
        tx_hex: &str,
        params: &NetworkParams,
    ) -> impl std::future::Future<Output = WalletResult<String>>;

    /// Submit a package (commit + spell) for atomic acceptance.
    fn submit_package(
        &self,
        tx_hexes: &[String],
        params: &NetworkParams,
    ) -> impl std::future::Future<Output = WalletResult<Vec<PackageTxResult>>>;
}
