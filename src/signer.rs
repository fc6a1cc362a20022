//! # Key Derivation and Taproot Signing
//!
//! Derives per-address private keys from the wallet seed along the fixed
//! BIP86 path, applies the Taproot tweak and produces BIP340 Schnorr
//! key-path signatures.
//!
//! Every derived key is checked against the address it claims to control
//! before it signs anything; a mismatch is fatal and never skipped. The
//! seed phrase is loaded from storage once per signing operation and the
//! per-input key material is erased as soon as the signature exists.

use crate::builder::{transaction_from_hex, transaction_to_hex};
use crate::config::derivation;
use crate::error::{WalletError, WalletResult};
use crate::network::NetworkParams;
use crate::services::external::Storage;
use crate::types::{SignedTransaction, Utxo};
use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::hashes::Hash;
use bitcoin::key::Keypair;
use bitcoin::secp256k1::{schnorr, All, Message, Parity, Secp256k1, SecretKey};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::taproot::TapTweakHash;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, ScriptBuf, TapSighashType, Transaction, TxOut, Witness, XOnlyPublicKey};
use log::{debug, info};

/// Derivation coordinates of the wallet address owning an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputOwner {
    pub address: String,
    pub index: u32,
    pub is_change: bool,
}

/// Per-input derivation result.
///
/// Owned exclusively by the signing operation that created it; the key
/// material is erased on drop and the context is never persisted.
#[derive(Debug)]
pub struct SigningContext {
    pub derivation_path: DerivationPath,
    pub internal_pubkey: XOnlyPublicKey,
    secret_key: SecretKey,
    tweaked_secret: SecretKey,
}

impl SigningContext {
    /// BIP340 signature over the tweaked key. Deterministic: the same seed
    /// and transaction always produce the same signature.
    fn sign(&self, secp: &Secp256k1<All>, msg: &Message) -> schnorr::Signature {
        let keypair = Keypair::from_secret_key(secp, &self.tweaked_secret);
        secp.sign_schnorr_no_aux_rand(msg, &keypair)
    }

    /// Output script of the Taproot address this context controls.
    fn prevout_script(&self, secp: &Secp256k1<All>) -> ScriptBuf {
        ScriptBuf::new_p2tr(secp, self.internal_pubkey, None)
    }
}

impl Drop for SigningContext {
    fn drop(&mut self) {
        self.secret_key.non_secure_erase();
        self.tweaked_secret.non_secure_erase();
    }
}

/// Derive the BIP32 master key from a mnemonic (empty passphrase).
pub fn master_from_mnemonic(phrase: &str, params: &NetworkParams) -> WalletResult<Xpriv> {
    let mnemonic = Mnemonic::parse(phrase)?;
    let seed = mnemonic.to_seed("");
    Ok(Xpriv::new_master(params.network, &seed)?)
}

/// The fixed BIP86 derivation path:
/// `m/86'/{coin_type}'/0'/{0|1}/{index}`.
pub fn derivation_path(
    params: &NetworkParams,
    is_change: bool,
    index: u32,
) -> WalletResult<DerivationPath> {
    let chain = if is_change { 1 } else { 0 };
    Ok(DerivationPath::from(vec![
        ChildNumber::from_hardened_idx(derivation::BIP86_PURPOSE)?,
        ChildNumber::from_hardened_idx(params.coin_type)?,
        ChildNumber::from_hardened_idx(derivation::ACCOUNT)?,
        ChildNumber::from_normal_idx(chain)?,
        ChildNumber::from_normal_idx(index)?,
    ]))
}

/// Derive the signing context for one owned address.
///
/// Confirms the derived key reconstructs the expected address, then applies
/// the Taproot tweak: the tagged hash of the x-only key, with the private
/// key negated first when the compressed public key has odd Y. A degenerate
/// tweaked scalar is rejected.
pub fn derive_signing_context(
    secp: &Secp256k1<All>,
    master: &Xpriv,
    params: &NetworkParams,
    owner: &InputOwner,
) -> WalletResult<SigningContext> {
    let path = derivation_path(params, owner.is_change, owner.index)?;
    let child = master.derive_priv(secp, &path)?;
    let keypair = child.to_keypair(secp);
    let (internal_pubkey, parity) = keypair.x_only_public_key();

    let derived = Address::p2tr(secp, internal_pubkey, None, params.network);
    if derived.to_string() != owner.address {
        return Err(WalletError::KeyMismatch {
            address: owner.address.clone(),
            derived: derived.to_string(),
        });
    }

    let tweak = TapTweakHash::from_key_and_tweak(internal_pubkey, None).to_scalar();
    let base = if parity == Parity::Odd {
        child.private_key.negate()
    } else {
        child.private_key
    };
    let tweaked_secret = base.add_tweak(&tweak).map_err(|_| WalletError::InvalidTweak)?;

    debug!("derived signing key at {}", path);

    Ok(SigningContext {
        derivation_path: path,
        internal_pubkey,
        secret_key: child.private_key,
        tweaked_secret,
    })
}

/// Resolve the wallet address owning `txid:vout`, with its derivation
/// coordinates. An address present in the UTXO store but missing from the
/// address list falls back to the first receive slot.
pub fn resolve_input_owner<S: Storage>(
    storage: &S,
    txid: &str,
    vout: u32,
    params: &NetworkParams,
) -> WalletResult<Option<InputOwner>> {
    let utxos = storage.find_utxos_by_txid(txid, params)?;
    let Some(utxo) = utxos.into_iter().find(|u| u.vout == vout) else {
        return Ok(None);
    };
    let Some(address) = utxo.address else {
        return Ok(None);
    };

    let entries = storage.addresses(params)?;
    let owner = match entries.iter().find(|e| e.address == address) {
        Some(entry) => InputOwner {
            address,
            index: entry.index,
            is_change: entry.is_change,
        },
        None => InputOwner {
            address,
            index: 0,
            is_change: false,
        },
    };
    Ok(Some(owner))
}

/// How one input of a transaction under signature is handled.
enum InputRole {
    /// Wallet-owned: signed with a freshly derived tweaked key.
    Wallet(SigningContext),
    /// Externally provided (the commit-transaction output); its witness is
    /// left untouched.
    External,
}

/// Taproot transaction signer bound to a storage collaborator and explicit
/// network parameters.
pub struct TaprootSigner<'a, S: Storage> {
    storage: &'a S,
    params: NetworkParams,
    secp: Secp256k1<All>,
}

impl<'a, S: Storage> TaprootSigner<'a, S> {
    pub fn new(storage: &'a S, params: NetworkParams) -> Self {
        Self {
            storage,
            params,
            secp: Secp256k1::new(),
        }
    }

    fn master(&self) -> WalletResult<Xpriv> {
        let phrase = self.storage.seed_phrase()?;
        master_from_mnemonic(&phrase, &self.params)
    }

    /// Sign every input of a wallet transaction.
    ///
    /// `known_utxos` supplies values and addresses for inputs selected in
    /// this session (the plan's UTXOs); anything missing is looked up in
    /// storage. All inputs must be wallet-owned Taproot outputs.
    pub fn sign_transaction(
        &self,
        tx: Transaction,
        known_utxos: &[Utxo],
    ) -> WalletResult<SignedTransaction> {
        let master = self.master()?;
        let mut tx = tx;
        tx.version = Version::TWO;

        let mut prevouts: Vec<TxOut> = Vec::with_capacity(tx.input.len());
        let mut roles: Vec<InputRole> = Vec::with_capacity(tx.input.len());

        for input in &tx.input {
            let txid = input.previous_output.txid.to_string();
            let vout = input.previous_output.vout;
            let utxo_id = format!("{txid}:{vout}");

            let utxo = self.lookup_utxo(&txid, vout, known_utxos)?;
            if utxo.is_p2pkh() {
                return Err(WalletError::invalid_utxo(
                    &utxo_id,
                    "legacy inputs are not signable; Taproot only",
                ));
            }
            let owner = self
                .owner_for_utxo(&utxo, &txid, vout)?
                .ok_or_else(|| {
                    WalletError::invalid_utxo(&utxo_id, "no wallet address owns this input")
                })?;

            let ctx = derive_signing_context(&self.secp, &master, &self.params, &owner)?;
            prevouts.push(TxOut {
                value: Amount::from_sat(utxo.value),
                script_pubkey: ctx.prevout_script(&self.secp),
            });
            roles.push(InputRole::Wallet(ctx));
        }

        self.attach_signatures(&mut tx, &prevouts, &roles)?;
        self.finish(tx)
    }

    /// Sign a commit transaction: a single wallet-funded input paying the
    /// spell's Taproot commitment output.
    pub fn sign_commit_transaction(&self, unsigned_tx_hex: &str) -> WalletResult<SignedTransaction> {
        let tx = transaction_from_hex(unsigned_tx_hex)?;
        if tx.input.len() != 1 {
            return Err(WalletError::transaction(format!(
                "commit transaction must have exactly one input, got {}",
                tx.input.len()
            )));
        }
        self.sign_transaction(tx, &[])
    }

    /// Sign a spell transaction returned by the prover.
    ///
    /// The transaction mixes wallet-owned inputs with one input spending
    /// the commit transaction's output. Only wallet-owned inputs receive
    /// fresh signatures; the commit input's witness is preserved exactly as
    /// the prover produced it. The BIP341 sighash still commits to every
    /// previous output, so the commit prevout is reconstructed from the
    /// commit transaction itself.
    pub fn sign_spell_transaction(
        &self,
        spell_tx_hex: &str,
        commit_tx_hex: &str,
    ) -> WalletResult<SignedTransaction> {
        let commit_tx = transaction_from_hex(commit_tx_hex)?;
        let commit_txid = commit_tx.compute_txid().to_string();

        let master = self.master()?;
        let mut tx = transaction_from_hex(spell_tx_hex)?;
        tx.version = Version::TWO;

        let mut prevouts: Vec<TxOut> = Vec::with_capacity(tx.input.len());
        let mut roles: Vec<InputRole> = Vec::with_capacity(tx.input.len());

        for input in &tx.input {
            let txid = input.previous_output.txid.to_string();
            let vout = input.previous_output.vout;
            let utxo_id = format!("{txid}:{vout}");

            if let Some(owner) = resolve_input_owner(self.storage, &txid, vout, &self.params)? {
                let utxo = self.lookup_utxo(&txid, vout, &[])?;
                let ctx = derive_signing_context(&self.secp, &master, &self.params, &owner)?;
                prevouts.push(TxOut {
                    value: Amount::from_sat(utxo.value),
                    script_pubkey: ctx.prevout_script(&self.secp),
                });
                roles.push(InputRole::Wallet(ctx));
            } else if txid == commit_txid {
                let commit_out = commit_tx.output.get(vout as usize).ok_or_else(|| {
                    WalletError::invalid_utxo(&utxo_id, "commit transaction has no such output")
                })?;
                prevouts.push(commit_out.clone());
                roles.push(InputRole::External);
            } else {
                return Err(WalletError::invalid_utxo(&utxo_id, "unknown input UTXO"));
            }
        }

        self.attach_signatures(&mut tx, &prevouts, &roles)?;
        self.finish(tx)
    }

    /// Compute the key-spend sighash for every input and attach signatures
    /// to the wallet-owned ones.
    fn attach_signatures(
        &self,
        tx: &mut Transaction,
        prevouts: &[TxOut],
        roles: &[InputRole],
    ) -> WalletResult<()> {
        let all_prevouts = Prevouts::All(prevouts);
        let mut signatures: Vec<Option<schnorr::Signature>> = Vec::with_capacity(roles.len());

        {
            let mut sighash_cache = SighashCache::new(&*tx);
            for (index, role) in roles.iter().enumerate() {
                match role {
                    InputRole::Wallet(ctx) => {
                        let sighash = sighash_cache
                            .taproot_key_spend_signature_hash(
                                index,
                                &all_prevouts,
                                TapSighashType::Default,
                            )
                            .map_err(|e| {
                                WalletError::transaction(format!(
                                    "sighash computation failed for input {index}: {e}"
                                ))
                            })?;
                        let msg = Message::from_digest(sighash.to_byte_array());
                        signatures.push(Some(ctx.sign(&self.secp, &msg)));
                    }
                    InputRole::External => signatures.push(None),
                }
            }
        }

        for (index, signature) in signatures.into_iter().enumerate() {
            if let Some(signature) = signature {
                // Sole witness element: the raw 64-byte signature
                // (default sighash type).
                let mut witness = Witness::new();
                witness.push(signature.as_ref());
                tx.input[index].witness = witness;
            }
        }
        Ok(())
    }

    fn finish(&self, tx: Transaction) -> WalletResult<SignedTransaction> {
        let txid = tx.compute_txid().to_string();
        let hex = transaction_to_hex(&tx);
        info!("signed transaction {} ({} bytes)", txid, hex.len() / 2);
        Ok(SignedTransaction { txid, hex })
    }

    fn lookup_utxo(&self, txid: &str, vout: u32, known_utxos: &[Utxo]) -> WalletResult<Utxo> {
        if let Some(utxo) = known_utxos
            .iter()
            .find(|u| u.txid == txid && u.vout == vout)
        {
            return Ok(utxo.clone());
        }
        let stored = self.storage.find_utxos_by_txid(txid, &self.params)?;
        stored
            .into_iter()
            .find(|u| u.vout == vout)
            .ok_or_else(|| {
                WalletError::invalid_utxo(format!("{txid}:{vout}"), "UTXO value not found")
            })
    }

    fn owner_for_utxo(
        &self,
        utxo: &Utxo,
        txid: &str,
        vout: u32,
    ) -> WalletResult<Option<InputOwner>> {
        if let Some(address) = &utxo.address {
            let entries = self.storage.addresses(&self.params)?;
            let owner = match entries.iter().find(|e| &e.address == address) {
                Some(entry) => InputOwner {
                    address: address.clone(),
                    index: entry.index,
                    is_change: entry.is_change,
                },
                None => InputOwner {
                    address: address.clone(),
                    index: 0,
                    is_change: false,
                },
            };
            return Ok(Some(owner));
        }
        resolve_input_owner(self.storage, txid, vout, &self.params)
    }
}
