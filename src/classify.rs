//! # Spendability Classifier
//!
//! Labels each UTXO as spendable or reserved based on protocol markers:
//! charm bindings, inscription envelopes, rune markers, dust heuristics,
//! confirmation state and the in-memory lock set.
//!
//! The rule ordering is load-bearing: the conservative dust heuristics run
//! before the lock/confirmation checks so that asset-bearing dust is never
//! reported as plain currency.

use crate::config::policy;
use crate::types::{Charm, ReservedReason, Spendability, Utxo, UtxoLockSet};
use bitcoin::opcodes::all::{OP_IF, OP_PUSHNUM_13, OP_RETURN};
use bitcoin::script::Instruction;
use bitcoin::Transaction;
use std::collections::HashSet;

/// Classify a single UTXO.
///
/// Pure function of its inputs; rules are applied in order and the first
/// match wins:
///
/// 1. value matches a potential-charm dust amount;
/// 2. the creating transaction carries an inscription envelope;
/// 3. value equals the protocol dust threshold, with a rune marker when
///    transaction data is available, or `Unknown` when it is not;
/// 4. the UTXO is locked;
/// 5. the UTXO is unconfirmed;
/// 6. the UTXO is bound to a known charm.
pub fn classify_utxo(
    utxo: &Utxo,
    charms: &[Charm],
    locked: &UtxoLockSet,
    raw_tx: Option<&Transaction>,
) -> Spendability {
    if policy::POTENTIAL_CHARM_VALUES.contains(&utxo.value) {
        return Spendability::Reserved(ReservedReason::PotentialCharm);
    }

    if let Some(tx) = raw_tx {
        if has_inscription_envelope(tx) {
            return Spendability::Reserved(ReservedReason::Inscription);
        }
    }

    if utxo.value == policy::DUST_THRESHOLD_SATS {
        match raw_tx {
            Some(tx) if has_rune_marker(tx) => {
                return Spendability::Reserved(ReservedReason::RuneMarker);
            }
            Some(_) => {}
            // No transaction context: not confirmed safe either.
            None => return Spendability::Unknown,
        }
    }

    if locked.is_locked(&utxo.id()) {
        return Spendability::Reserved(ReservedReason::Locked);
    }

    if utxo.confirmations == 0 {
        return Spendability::Reserved(ReservedReason::Unconfirmed);
    }

    if is_charm_bound(utxo, charms) {
        return Spendability::Reserved(ReservedReason::CharmBound);
    }

    Spendability::Spendable
}

/// True when the UTXO's `(txid, vout)` matches a known charm record.
pub fn is_charm_bound(utxo: &Utxo, charms: &[Charm]) -> bool {
    charms
        .iter()
        .any(|c| c.txid == utxo.txid && c.output_index == utxo.vout)
}

/// Detect an ordinal inscription envelope in any input witness.
///
/// The envelope is a tapscript leaf containing the sequence
/// `OP_FALSE OP_IF "ord"`. Parsing failures mean "no envelope": this runs
/// over arbitrary on-chain data and must not reject legitimate outputs on
/// malformed scripts.
pub fn has_inscription_envelope(tx: &Transaction) -> bool {
    tx.input.iter().any(|input| {
        let Some(leaf) = input.witness.taproot_leaf_script() else {
            return false;
        };
        script_has_envelope(leaf.script)
    })
}

fn script_has_envelope(script: &bitcoin::Script) -> bool {
    let mut saw_empty_push = false;
    let mut saw_if = false;
    for instruction in script.instructions() {
        let Ok(instruction) = instruction else {
            return false;
        };
        match instruction {
            Instruction::PushBytes(bytes) if bytes.is_empty() => {
                saw_empty_push = true;
                saw_if = false;
            }
            Instruction::Op(op) if op == OP_IF && saw_empty_push => {
                saw_if = true;
            }
            Instruction::PushBytes(bytes) if saw_if => {
                if bytes.as_bytes() == b"ord" {
                    return true;
                }
                saw_empty_push = false;
                saw_if = false;
            }
            _ => {
                saw_empty_push = false;
                saw_if = false;
            }
        }
    }
    false
}

/// Detect a rune marker: an `OP_RETURN OP_13` output script.
pub fn has_rune_marker(tx: &Transaction) -> bool {
    tx.output.iter().any(|output| {
        let mut instructions = output.script_pubkey.instructions();
        matches!(instructions.next(), Some(Ok(Instruction::Op(op))) if op == OP_RETURN)
            && matches!(instructions.next(), Some(Ok(Instruction::Op(op))) if op == OP_PUSHNUM_13)
    })
}

/// Filter a UTXO snapshot down to the spendable set, deduplicating by
/// identity. Classification runs without transaction context here; callers
/// holding raw transactions should classify individually.
pub fn filter_spendable(utxos: &[Utxo], charms: &[Charm], locked: &UtxoLockSet) -> Vec<Utxo> {
    let mut seen = HashSet::new();
    utxos
        .iter()
        .filter(|u| seen.insert(u.id().to_string()))
        .filter(|u| classify_utxo(u, charms, locked, None).is_spendable())
        .cloned()
        .collect()
}

/// Total value of the spendable set.
pub fn spendable_balance(utxos: &[Utxo], charms: &[Charm], locked: &UtxoLockSet) -> u64 {
    filter_spendable(utxos, charms, locked)
        .iter()
        .map(|u| u.value)
        .sum()
}
