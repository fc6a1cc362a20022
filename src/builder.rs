//! # Unsigned Transaction Builder
//!
//! Turns a `TransactionPlan` into an unsigned version-2 transaction with
//! RBF-enabled inputs, enforcing the `inputs == outputs + fee` balance
//! before returning.

use crate::error::{WalletError, WalletResult};
use crate::network::{validate_address, NetworkParams};
use crate::types::TransactionPlan;
use bitcoin::{
    absolute::LockTime, consensus, transaction::Version, Amount, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Witness,
};

/// Build the unsigned transaction for a plan.
///
/// Outputs are the destination payment plus a change output when the plan
/// carries change. The change address must belong to the active network.
pub fn build_unsigned_transaction(
    plan: &TransactionPlan,
    change_address: &str,
    params: &NetworkParams,
) -> WalletResult<Transaction> {
    let destination = validate_address(&plan.destination, params)?;

    let input = plan
        .selected_utxos
        .iter()
        .map(|utxo| {
            Ok(TxIn {
                previous_output: utxo.id().outpoint()?,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
        })
        .collect::<WalletResult<Vec<_>>>()?;

    let mut output = vec![TxOut {
        value: Amount::from_sat(plan.amount),
        script_pubkey: destination.script_pubkey(),
    }];

    if plan.change > 0 {
        let change = validate_address(change_address, params)?;
        output.push(TxOut {
            value: Amount::from_sat(plan.change),
            script_pubkey: change.script_pubkey(),
        });
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    };

    let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    if plan.total_selected != total_out + plan.estimated_fee {
        return Err(WalletError::transaction(format!(
            "unbalanced transaction: {} in != {} out + {} fee",
            plan.total_selected, total_out, plan.estimated_fee
        )));
    }

    Ok(tx)
}

/// Serialize a transaction to consensus hex.
pub fn transaction_to_hex(tx: &Transaction) -> String {
    consensus::encode::serialize_hex(tx)
}

/// Parse a transaction from consensus hex.
pub fn transaction_from_hex(tx_hex: &str) -> WalletResult<Transaction> {
    let bytes = hex::decode(tx_hex)
        .map_err(|e| WalletError::transaction(format!("invalid transaction hex: {e}")))?;
    consensus::deserialize(&bytes)
        .map_err(|e| WalletError::transaction(format!("transaction decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Utxo;

    const DEST: &str = "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr";
    const CHANGE: &str = "bc1p4qhjn9zdvkux4e44uhx8tc55attvtyu358kutcqkudyccelu0was9fqzwh";

    fn utxo(value: u64) -> Utxo {
        Utxo {
            txid: "ab".repeat(32),
            vout: 1,
            value,
            script_pubkey: "5120".to_string() + &"11".repeat(32),
            confirmations: 2,
            address: None,
        }
    }

    #[test]
    fn test_build_with_change() {
        let plan =
            TransactionPlan::new(vec![utxo(100_000)], 270, 49_730, DEST, 50_000).unwrap();
        let tx = build_unsigned_transaction(&plan, CHANGE, &NetworkParams::mainnet()).unwrap();
        assert_eq!(tx.version, Version::TWO);
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[0].value.to_sat(), 50_000);
        assert_eq!(tx.output[1].value.to_sat(), 49_730);
    }

    #[test]
    fn test_build_sweep_no_change() {
        let plan = TransactionPlan::new(vec![utxo(100_000)], 300, 0, DEST, 99_700).unwrap();
        let tx = build_unsigned_transaction(&plan, CHANGE, &NetworkParams::mainnet()).unwrap();
        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[0].value.to_sat(), 99_700);
    }

    #[test]
    fn test_hex_roundtrip() {
        let plan = TransactionPlan::new(vec![utxo(100_000)], 300, 0, DEST, 99_700).unwrap();
        let tx = build_unsigned_transaction(&plan, CHANGE, &NetworkParams::mainnet()).unwrap();
        let decoded = transaction_from_hex(&transaction_to_hex(&tx)).unwrap();
        assert_eq!(decoded, tx);
        // Decoding reproduces the original outpoint set and output values.
        assert_eq!(
            decoded.input[0].previous_output.to_string(),
            format!("{}:1", "ab".repeat(32))
        );
    }

    #[test]
    fn test_wrong_network_address_rejected() {
        let plan = TransactionPlan::new(vec![utxo(100_000)], 300, 0, DEST, 99_700).unwrap();
        let err = build_unsigned_transaction(&plan, CHANGE, &NetworkParams::testnet());
        assert!(err.is_err());
    }
}
