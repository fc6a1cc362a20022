//! # Core Data Model
//!
//! Value types shared across selection, signing and spell composition.
//! All records here are immutable snapshots borrowed from the storage
//! collaborator for the duration of one operation.

use crate::config::policy;
use crate::error::{WalletError, WalletResult};
use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Identity of a UTXO: `(txid, vout)`, rendered as `"<txid>:<vout>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtxoId {
    pub txid: String,
    pub vout: u32,
}

impl UtxoId {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }

    /// Convert to a `bitcoin::OutPoint`
    pub fn outpoint(&self) -> WalletResult<OutPoint> {
        let txid = Txid::from_str(&self.txid)
            .map_err(|e| WalletError::invalid_utxo(self.to_string(), e.to_string()))?;
        Ok(OutPoint::new(txid, self.vout))
    }
}

impl fmt::Display for UtxoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl FromStr for UtxoId {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .split_once(':')
            .ok_or_else(|| WalletError::invalid_utxo(s, "expected <txid>:<vout>"))?;
        if txid.len() != 64 || !txid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WalletError::invalid_utxo(s, "txid must be 64 hex characters"));
        }
        let vout = vout
            .parse::<u32>()
            .map_err(|_| WalletError::invalid_utxo(s, "vout must be a non-negative integer"))?;
        Ok(Self::new(txid, vout))
    }
}

/// An unspent transaction output as observed on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Funding transaction id (hex)
    pub txid: String,
    /// Output index in the funding transaction
    pub vout: u32,
    /// Value in satoshis
    pub value: u64,
    /// Output script (hex)
    pub script_pubkey: String,
    /// Number of confirmations at observation time
    pub confirmations: u32,
    /// Owning wallet address, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Utxo {
    pub fn id(&self) -> UtxoId {
        UtxoId::new(self.txid.clone(), self.vout)
    }

    /// True when the output script is legacy pay-to-pubkey-hash
    pub fn is_p2pkh(&self) -> bool {
        self.script_pubkey.starts_with("76a9")
    }
}

/// A wallet address with its derivation coordinates.
///
/// Looked up by address string to recover `(index, is_change)`; never
/// mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    pub address: String,
    pub index: u32,
    #[serde(default)]
    pub is_change: bool,
}

/// Normalized charm amount.
///
/// The storage boundary converts historical numeric forms into this shape
/// before any record reaches the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharmAmount {
    pub ticker: String,
    pub remaining: u64,
}

/// An asset record bound to a specific UTXO.
///
/// Created when a spell output is observed on-chain; consumed when its UTXO
/// is spent by a new spell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charm {
    /// Stable identifier, used as the `$`-prefixed app key in spells
    pub id: String,
    /// Hosting transaction id (hex)
    pub txid: String,
    /// Hosting output index
    pub output_index: u32,
    /// App descriptor: `type/appId/appVk`
    pub app: String,
    pub amount: CharmAmount,
    /// Address holding the charm UTXO
    pub address: String,
}

impl Charm {
    pub fn utxo_id(&self) -> UtxoId {
        UtxoId::new(self.txid.clone(), self.output_index)
    }

    /// Non-fungible charms carry an `n/...` app descriptor
    pub fn is_nft(&self) -> bool {
        self.app.starts_with("n/")
    }
}

/// Why a UTXO was classified as not spendable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedReason {
    /// Value matches a known potential-charm dust amount
    PotentialCharm,
    /// Creating transaction carries an inscription envelope
    Inscription,
    /// Creating transaction carries a rune marker
    RuneMarker,
    /// Already committed to an in-flight transaction
    Locked,
    /// Zero confirmations
    Unconfirmed,
    /// Matches a known charm record
    CharmBound,
}

/// Three-valued spendability classification.
///
/// `Unknown` marks a protocol-dust output observed without transaction
/// context: not spendable, but distinct from a confirmed marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spendability {
    Spendable,
    Reserved(ReservedReason),
    Unknown,
}

impl Spendability {
    pub fn is_spendable(&self) -> bool {
        matches!(self, Spendability::Spendable)
    }
}

/// In-memory lock set preventing concurrent selection from reusing inputs
/// committed to an in-flight transaction.
///
/// Lock and unlock are idempotent; the set supports bulk clearing on wallet
/// reset.
#[derive(Debug, Default, Clone)]
pub struct UtxoLockSet {
    locked: HashSet<String>,
}

impl UtxoLockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&mut self, id: &UtxoId) {
        self.locked.insert(id.to_string());
    }

    pub fn unlock(&mut self, id: &UtxoId) {
        self.locked.remove(&id.to_string());
    }

    pub fn lock_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a UtxoId>) {
        for id in ids {
            self.lock(id);
        }
    }

    pub fn unlock_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a UtxoId>) {
        for id in ids {
            self.unlock(id);
        }
    }

    pub fn is_locked(&self, id: &UtxoId) -> bool {
        self.locked.contains(&id.to_string())
    }

    pub fn clear(&mut self) {
        self.locked.clear();
    }

    pub fn len(&self) -> usize {
        self.locked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked.is_empty()
    }
}

/// An in-memory transaction plan produced by coin selection.
///
/// Holds the balance invariant `total_selected == amount + estimated_fee +
/// change` with change either zero or above the dust threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPlan {
    pub selected_utxos: Vec<Utxo>,
    pub total_selected: u64,
    pub estimated_fee: u64,
    pub change: u64,
    pub destination: String,
    pub amount: u64,
}

impl TransactionPlan {
    /// Build a plan, enforcing the balance and dust invariants.
    pub fn new(
        selected_utxos: Vec<Utxo>,
        estimated_fee: u64,
        change: u64,
        destination: impl Into<String>,
        amount: u64,
    ) -> WalletResult<Self> {
        let total_selected: u64 = selected_utxos.iter().map(|u| u.value).sum();
        if total_selected != amount + estimated_fee + change {
            return Err(WalletError::transaction(format!(
                "unbalanced plan: {} selected != {} amount + {} fee + {} change",
                total_selected, amount, estimated_fee, change
            )));
        }
        if change != 0 && change < policy::DUST_THRESHOLD_SATS {
            return Err(WalletError::transaction(format!(
                "plan change {} sats is below the dust threshold",
                change
            )));
        }
        Ok(Self {
            selected_utxos,
            total_selected,
            estimated_fee,
            change,
            destination: destination.into(),
            amount,
        })
    }

    pub fn input_ids(&self) -> Vec<UtxoId> {
        self.selected_utxos.iter().map(|u| u.id()).collect()
    }
}

/// Result of a signing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub txid: String,
    pub hex: String,
}
