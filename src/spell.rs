//! # Spell Composition
//!
//! Builds the transfer descriptor ("spell") for charm assets. Fungible
//! charms split into a destination output and a remainder back to the
//! charm's own address; non-fungible charms move whole to a single output.
//!
//! A spell is a value object: it is never mutated after composition, and a
//! failed prove or sign requires composing a new one. Maps are `BTreeMap`s
//! so the JSON rendering is deterministic.

use crate::config::policy;
use crate::error::{WalletError, WalletResult};
use crate::network::{validate_address, NetworkParams};
use crate::types::{Charm, CharmAmount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current spell protocol version.
pub const SPELL_VERSION: u32 = 2;

/// A transfer spell input: the charm-bearing UTXO and its charm content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellInput {
    pub utxo_id: String,
    pub charms: BTreeMap<String, CharmAmount>,
}

/// A transfer spell output: destination, charm content and carried sats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellOutput {
    pub address: String,
    pub charms: BTreeMap<String, CharmAmount>,
    pub sats: u64,
}

/// A versioned transfer descriptor.
///
/// Every app key is namespaced (`"$<charm id>"`) and appears identically in
/// `apps`, the input charms and the output charms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spell {
    pub version: u32,
    pub apps: BTreeMap<String, String>,
    pub ins: Vec<SpellInput>,
    pub outs: Vec<SpellOutput>,
}

impl Spell {
    /// Deterministic JSON rendering: identical spells serialize to
    /// byte-identical JSON.
    pub fn to_json(&self) -> WalletResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Compose a transfer spell for a charm, branching on the asset kind
/// encoded in its app descriptor (`"n/..."` is non-fungible).
pub fn compose_transfer_spell(
    charm: &Charm,
    transfer_amount: u64,
    destination: &str,
    params: &NetworkParams,
) -> WalletResult<Spell> {
    if charm.is_nft() {
        compose_nft_transfer(charm, transfer_amount, destination, params)
    } else {
        compose_token_transfer(charm, transfer_amount, destination, params)
    }
}

/// Fungible transfer: destination output plus a remainder output back to
/// the charm's own address, both at the fixed spell output value.
fn compose_token_transfer(
    charm: &Charm,
    transfer_amount: u64,
    destination: &str,
    params: &NetworkParams,
) -> WalletResult<Spell> {
    let app = validated_app(charm)?;
    validate_address(destination, params)?;
    validate_address(&charm.address, params)?;

    let total = charm.amount.remaining;
    let remaining_after = total
        .checked_sub(transfer_amount)
        .ok_or(WalletError::InsufficientCharmAmount {
            transfer: transfer_amount,
            total,
        })?;

    let app_key = format!("${}", charm.id);

    let mut apps = BTreeMap::new();
    apps.insert(app_key.clone(), app);

    let mut input_charms = BTreeMap::new();
    input_charms.insert(
        app_key.clone(),
        CharmAmount {
            ticker: charm.amount.ticker.clone(),
            remaining: total,
        },
    );

    let mut transfer_charms = BTreeMap::new();
    transfer_charms.insert(
        app_key.clone(),
        CharmAmount {
            ticker: charm.amount.ticker.clone(),
            remaining: transfer_amount,
        },
    );

    let mut remainder_charms = BTreeMap::new();
    remainder_charms.insert(
        app_key,
        CharmAmount {
            ticker: charm.amount.ticker.clone(),
            remaining: remaining_after,
        },
    );

    Ok(Spell {
        version: SPELL_VERSION,
        apps,
        ins: vec![SpellInput {
            utxo_id: charm.utxo_id().to_string(),
            charms: input_charms,
        }],
        outs: vec![
            SpellOutput {
                address: destination.to_string(),
                charms: transfer_charms,
                sats: policy::SPELL_OUTPUT_SATS,
            },
            SpellOutput {
                address: charm.address.clone(),
                charms: remainder_charms,
                sats: policy::SPELL_OUTPUT_SATS,
            },
        ],
    })
}

/// Non-fungible transfer: one output carrying the full charm amount.
/// A split request fails.
fn compose_nft_transfer(
    charm: &Charm,
    transfer_amount: u64,
    destination: &str,
    params: &NetworkParams,
) -> WalletResult<Spell> {
    let app = validated_app(charm)?;
    validate_address(destination, params)?;
    validate_address(&charm.address, params)?;

    if transfer_amount != charm.amount.remaining {
        return Err(WalletError::spell(
            "non-fungible charms transfer whole; partial amounts are not allowed",
        ));
    }

    let app_key = format!("${}", charm.id);

    let mut apps = BTreeMap::new();
    apps.insert(app_key.clone(), app);

    let mut charms = BTreeMap::new();
    charms.insert(app_key, charm.amount.clone());

    Ok(Spell {
        version: SPELL_VERSION,
        apps,
        ins: vec![SpellInput {
            utxo_id: charm.utxo_id().to_string(),
            charms: charms.clone(),
        }],
        outs: vec![SpellOutput {
            address: destination.to_string(),
            charms,
            sats: policy::SPELL_OUTPUT_SATS,
        }],
    })
}

/// The app descriptor must have exactly three `/`-separated, non-empty
/// parts: `type/appId/appVk`.
fn validated_app(charm: &Charm) -> WalletResult<String> {
    let parts: Vec<&str> = charm.app.split('/').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(WalletError::spell(format!(
            "invalid app format: {}",
            charm.app
        )));
    }
    Ok(charm.app.clone())
}

/// Result of selecting charm UTXOs to cover a transfer amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharmSelection {
    pub selected: Vec<Charm>,
    pub total: u64,
    pub change: u64,
}

/// Select charm UTXOs for `app` until `amount` is covered, largest first.
///
/// Input count is capped by the prover's spell input limit, so the maximum
/// transferable amount can be below the total balance.
pub fn select_charms_for_amount(
    charms: &[Charm],
    app: &str,
    amount: u64,
) -> WalletResult<CharmSelection> {
    let mut matching: Vec<&Charm> = charms.iter().filter(|c| c.app == app).collect();
    if matching.is_empty() {
        return Err(WalletError::spell(format!("no charm UTXOs found for {app}")));
    }
    matching.sort_by(|a, b| b.amount.remaining.cmp(&a.amount.remaining));

    let mut selected = Vec::new();
    let mut total: u64 = 0;
    for charm in matching {
        if total >= amount || selected.len() >= policy::MAX_SPELL_INPUT_UTXOS {
            break;
        }
        total += charm.amount.remaining;
        selected.push(charm.clone());
    }

    if total < amount {
        return Err(WalletError::InsufficientCharmAmount {
            transfer: amount,
            total: max_transferable_amount(charms, app),
        });
    }

    Ok(CharmSelection {
        selected,
        total,
        change: total - amount,
    })
}

/// Maximum amount transferable in one spell given the input cap.
pub fn max_transferable_amount(charms: &[Charm], app: &str) -> u64 {
    let mut matching: Vec<u64> = charms
        .iter()
        .filter(|c| c.app == app)
        .map(|c| c.amount.remaining)
        .collect();
    matching.sort_by(|a, b| b.cmp(a));
    matching
        .iter()
        .take(policy::MAX_SPELL_INPUT_UTXOS)
        .sum()
}

/// Total balance held in charm UTXOs of one app.
pub fn charm_balance(charms: &[Charm], app: &str) -> u64 {
    charms
        .iter()
        .filter(|c| c.app == app)
        .map(|c| c.amount.remaining)
        .sum()
}
