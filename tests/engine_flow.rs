//! End-to-end engine tests: classification, selection, transaction
//! building and Taproot signing against an in-memory storage collaborator.

use charms_wallet_core::builder::{build_unsigned_transaction, transaction_from_hex};
use charms_wallet_core::classify::{classify_utxo, filter_spendable};
use charms_wallet_core::selection::{estimate_fee, CoinSelector};
use charms_wallet_core::services::external::{LivenessOracle, Storage};
use charms_wallet_core::services::prover::{build_payload, validate_payload};
use charms_wallet_core::signer::TaprootSigner;
use charms_wallet_core::spell::compose_transfer_spell;
use charms_wallet_core::types::{
    AddressEntry, Charm, CharmAmount, Spendability, Utxo, UtxoId, UtxoLockSet,
};
use charms_wallet_core::{NetworkParams, WalletError, WalletResult};

use bitcoin::consensus;
use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Witness,
};
use std::cell::RefCell;
use std::collections::HashSet;
use std::str::FromStr;

/// BIP39/BIP86 reference mnemonic and its first mainnet addresses.
const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const RECEIVE_0: &str = "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr";
const RECEIVE_1: &str = "bc1p4qhjn9zdvkux4e44uhx8tc55attvtyu358kutcqkudyccelu0was9fqzwh";
const CHANGE_0: &str = "bc1p3qkhfews2uk44qtvauqyr2ttdsw7svhkl9nkm9s9c3x4ax5h60wqwruhk7";

struct MemoryStorage {
    seed: String,
    addresses: Vec<AddressEntry>,
    utxos: Vec<Utxo>,
    charms: Vec<Charm>,
    removed: RefCell<Vec<String>>,
}

impl MemoryStorage {
    fn new(utxos: Vec<Utxo>) -> Self {
        Self {
            seed: MNEMONIC.to_string(),
            addresses: vec![
                AddressEntry {
                    address: RECEIVE_0.to_string(),
                    index: 0,
                    is_change: false,
                },
                AddressEntry {
                    address: RECEIVE_1.to_string(),
                    index: 1,
                    is_change: false,
                },
                AddressEntry {
                    address: CHANGE_0.to_string(),
                    index: 0,
                    is_change: true,
                },
            ],
            utxos,
            charms: vec![],
            removed: RefCell::new(vec![]),
        }
    }
}

impl Storage for MemoryStorage {
    fn seed_phrase(&self) -> WalletResult<String> {
        Ok(self.seed.clone())
    }

    fn addresses(&self, _params: &NetworkParams) -> WalletResult<Vec<AddressEntry>> {
        Ok(self.addresses.clone())
    }

    fn find_utxos_by_txid(&self, txid: &str, _params: &NetworkParams) -> WalletResult<Vec<Utxo>> {
        Ok(self
            .utxos
            .iter()
            .filter(|u| u.txid == txid)
            .cloned()
            .collect())
    }

    fn charms(&self, _params: &NetworkParams) -> WalletResult<Vec<Charm>> {
        Ok(self.charms.clone())
    }

    fn remove_utxo(&self, id: &UtxoId, _params: &NetworkParams) -> WalletResult<()> {
        self.removed.borrow_mut().push(id.to_string());
        Ok(())
    }
}

/// Oracle with scripted answers per UTXO.
struct ScriptedOracle {
    spent: HashSet<String>,
    failing: HashSet<String>,
}

impl ScriptedOracle {
    fn new() -> Self {
        Self {
            spent: HashSet::new(),
            failing: HashSet::new(),
        }
    }
}

impl LivenessOracle for ScriptedOracle {
    async fn is_utxo_spent(
        &self,
        txid: &str,
        vout: u32,
        _params: &NetworkParams,
    ) -> WalletResult<bool> {
        let key = format!("{txid}:{vout}");
        if self.failing.contains(&key) {
            return Err(WalletError::storage("oracle unavailable"));
        }
        Ok(self.spent.contains(&key))
    }
}

fn wallet_utxo(txid_byte: &str, vout: u32, value: u64, address: &str) -> Utxo {
    let script = bitcoin::Address::from_str(address)
        .unwrap()
        .assume_checked()
        .script_pubkey();
    Utxo {
        txid: txid_byte.repeat(32),
        vout,
        value,
        script_pubkey: script.to_hex_string(),
        confirmations: 3,
        address: Some(address.to_string()),
    }
}

#[test]
fn send_flow_produces_balanced_signed_transaction() {
    let params = NetworkParams::mainnet();
    let utxo = wallet_utxo("ab", 0, 100_000, RECEIVE_0);
    let storage = MemoryStorage::new(vec![utxo.clone()]);

    // Classify: confirmed, charm-free and unlocked, so spendable.
    let locks = UtxoLockSet::new();
    assert_eq!(
        classify_utxo(&utxo, &storage.charms, &locks, None),
        Spendability::Spendable
    );
    let spendable = filter_spendable(&[utxo], &storage.charms, &locks);

    // Select 50,000 sats at 2 sat/vB.
    let mut selector = CoinSelector::new();
    let plan = selector.select(&spendable, 50_000, 2.0, RECEIVE_1).unwrap();
    assert_eq!(plan.estimated_fee, 270);
    assert_eq!(plan.change, 49_730);

    // Build and sign.
    let unsigned = build_unsigned_transaction(&plan, CHANGE_0, &params).unwrap();
    let signer = TaprootSigner::new(&storage, params);
    let signed = signer
        .sign_transaction(unsigned, &plan.selected_utxos)
        .unwrap();

    let tx = transaction_from_hex(&signed.hex).unwrap();
    assert_eq!(tx.version, Version::TWO);
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].witness.len(), 1);
    // Default sighash type: the sole witness element is the raw signature.
    assert_eq!(tx.input[0].witness.iter().next().unwrap().len(), 64);

    // Decoding reproduces the planned input set and output values.
    assert_eq!(
        tx.input[0].previous_output.to_string(),
        plan.selected_utxos[0].id().to_string()
    );
    let out_values: Vec<u64> = tx.output.iter().map(|o| o.value.to_sat()).collect();
    assert_eq!(out_values, vec![50_000, 49_730]);
    let total_out: u64 = out_values.iter().sum();
    assert_eq!(plan.total_selected, total_out + plan.estimated_fee);
    assert_eq!(signed.txid, tx.compute_txid().to_string());
}

#[test]
fn max_send_routes_to_sweep() {
    let utxo = wallet_utxo("ab", 0, 100_000, RECEIVE_0);
    let one_output_fee = estimate_fee(std::slice::from_ref(&utxo), 1, 2.0);

    let mut selector = CoinSelector::new();
    let plan = selector
        .select(&[utxo], 100_000 - one_output_fee, 2.0, RECEIVE_1)
        .unwrap();
    assert_eq!(plan.change, 0);
    assert_eq!(plan.selected_utxos.len(), 1);
    assert_eq!(plan.amount + plan.estimated_fee, 100_000);

    let unsigned =
        build_unsigned_transaction(&plan, CHANGE_0, &NetworkParams::mainnet()).unwrap();
    assert_eq!(unsigned.output.len(), 1);
}

#[tokio::test]
async fn verified_selection_drops_spent_inputs() {
    let params = NetworkParams::mainnet();
    let spent_utxo = wallet_utxo("aa", 0, 80_000, RECEIVE_0);
    let live_utxo = wallet_utxo("bb", 0, 60_000, RECEIVE_0);
    let flaky_utxo = wallet_utxo("cc", 0, 50_000, RECEIVE_0);
    let storage = MemoryStorage::new(vec![
        spent_utxo.clone(),
        live_utxo.clone(),
        flaky_utxo.clone(),
    ]);

    let mut oracle = ScriptedOracle::new();
    oracle.spent.insert(spent_utxo.id().to_string());
    // A failing check must count as "assume unspent", not abort the batch.
    oracle.failing.insert(flaky_utxo.id().to_string());

    let mut selector = CoinSelector::new();
    let plan = selector
        .select_verified(
            &oracle,
            &storage,
            &[spent_utxo.clone(), live_utxo.clone(), flaky_utxo.clone()],
            90_000,
            1.0,
            RECEIVE_1,
            &params,
        )
        .await
        .unwrap();

    // The spent UTXO is out of the plan and reported to storage.
    assert!(plan
        .selected_utxos
        .iter()
        .all(|u| u.id() != spent_utxo.id()));
    assert_eq!(plan.selected_utxos.len(), 2);
    assert_eq!(
        storage.removed.borrow().as_slice(),
        &[spent_utxo.id().to_string()]
    );
}

#[tokio::test]
async fn verified_selection_reports_shortfall() {
    let params = NetworkParams::mainnet();
    let only_utxo = wallet_utxo("aa", 0, 80_000, RECEIVE_0);
    let storage = MemoryStorage::new(vec![only_utxo.clone()]);

    let mut oracle = ScriptedOracle::new();
    oracle.spent.insert(only_utxo.id().to_string());

    let mut selector = CoinSelector::new();
    let err = selector
        .select_verified(&oracle, &storage, &[only_utxo], 50_000, 1.0, RECEIVE_1, &params)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds { .. }));
}

#[tokio::test]
async fn double_spend_after_signing_forces_reselection() {
    let params = NetworkParams::mainnet();
    let utxo = wallet_utxo("ab", 0, 100_000, RECEIVE_0);
    let storage = MemoryStorage::new(vec![utxo.clone()]);

    let mut selector = CoinSelector::new();
    let plan = selector.select(&[utxo.clone()], 50_000, 2.0, RECEIVE_1).unwrap();
    assert_eq!(selector.locked_count(), 1);

    let mut oracle = ScriptedOracle::new();
    oracle.spent.insert(utxo.id().to_string());

    let err = selector
        .recheck_plan(&oracle, &storage, &plan, &params)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DoubleSpendDetected { .. }));
    // The plan's inputs are unlocked so re-selection can run.
    assert_eq!(selector.locked_count(), 0);
}

#[test]
fn spell_transaction_signing_preserves_commit_witness() {
    let params = NetworkParams::mainnet();
    let wallet_input = wallet_utxo("ab", 0, 100_000, RECEIVE_0);
    let storage = MemoryStorage::new(vec![wallet_input.clone()]);

    // Commit transaction: one output funding the spell.
    let commit_script = bitcoin::Address::from_str(RECEIVE_1)
        .unwrap()
        .assume_checked()
        .script_pubkey();
    let commit_tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::from_str(&format!("{}:3", "ee".repeat(32))).unwrap(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(8_000),
            script_pubkey: commit_script,
        }],
    };
    let commit_hex = consensus::encode::serialize_hex(&commit_tx);
    let commit_txid = commit_tx.compute_txid();

    // Spell transaction: wallet input first, then the commit output, with
    // the prover-provided witness already attached to the commit input.
    let prover_witness = Witness::from_slice(&[vec![0x51u8; 64], b"spell-proof".to_vec()]);
    let spell_tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![
            TxIn {
                previous_output: wallet_input.id().outpoint().unwrap(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            },
            TxIn {
                previous_output: OutPoint::new(commit_txid, 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: prover_witness.clone(),
            },
        ],
        output: vec![TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: bitcoin::Address::from_str(RECEIVE_1)
                .unwrap()
                .assume_checked()
                .script_pubkey(),
        }],
    };
    let spell_hex = consensus::encode::serialize_hex(&spell_tx);

    let signer = TaprootSigner::new(&storage, params);
    let signed = signer.sign_spell_transaction(&spell_hex, &commit_hex).unwrap();

    let tx = transaction_from_hex(&signed.hex).unwrap();
    // Wallet input got a fresh 64-byte key-path signature.
    assert_eq!(tx.input[0].witness.len(), 1);
    assert_eq!(tx.input[0].witness.iter().next().unwrap().len(), 64);
    // The externally signed commit input is untouched.
    assert_eq!(tx.input[1].witness, prover_witness);
}

#[test]
fn spell_transaction_rejects_unknown_inputs() {
    let params = NetworkParams::mainnet();
    let storage = MemoryStorage::new(vec![]);

    let commit_tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::from_str(&format!("{}:0", "ee".repeat(32))).unwrap(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(8_000),
            script_pubkey: bitcoin::Address::from_str(RECEIVE_1)
                .unwrap()
                .assume_checked()
                .script_pubkey(),
        }],
    };
    let commit_hex = consensus::encode::serialize_hex(&commit_tx);

    let stranger = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::from_str(&format!("{}:0", "99".repeat(32))).unwrap(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![],
    };
    let stranger_hex = consensus::encode::serialize_hex(&stranger);

    let signer = TaprootSigner::new(&storage, params);
    let err = signer
        .sign_spell_transaction(&stranger_hex, &commit_hex)
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidUtxo { .. }));
}

#[test]
fn composed_spell_feeds_a_valid_prover_payload() -> anyhow::Result<()> {
    let params = NetworkParams::mainnet();
    let charm = Charm {
        id: "0a1b".to_string(),
        txid: "cd".repeat(32),
        output_index: 1,
        app: "t/0a1b/ffee".to_string(),
        amount: CharmAmount {
            ticker: "TOKEN".to_string(),
            remaining: 100_000,
        },
        address: RECEIVE_0.to_string(),
    };
    let spell = compose_transfer_spell(&charm, 25_000, RECEIVE_1, &params)?;

    let funding = wallet_utxo("ab", 0, 40_000, RECEIVE_0);
    let payload = build_payload(spell, &funding, vec!["0200".to_string()], 2.0, &params)?;
    validate_payload(&payload)?;
    assert_eq!(payload.chain, "bitcoin");
    assert_eq!(payload.change_address, RECEIVE_0);
    assert_eq!(payload.funding_utxo_value, 40_000);
    Ok(())
}
