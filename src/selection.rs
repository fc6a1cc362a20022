//! # Coin Selection
//!
//! Greedy coin selection over the spendable UTXO set, with a target-amount
//! mode and a sweep mode, per-selection fee recomputation and an in-memory
//! lock set guarding in-flight inputs.
//!
//! Selection must fully complete, including any liveness verification,
//! before the transaction is built: signing requires exact input ordering
//! and committed previous-output values.

use crate::config::{fees, policy};
use crate::error::{WalletError, WalletResult};
use crate::network::NetworkParams;
use crate::services::external::{LivenessOracle, Storage};
use crate::types::{TransactionPlan, Utxo, UtxoId, UtxoLockSet};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashSet;

/// Estimate the fee for spending the given inputs with `output_count`
/// outputs at `fee_rate` sat/vbyte.
///
/// Legacy P2PKH inputs cost 148 vbytes, everything else is costed as a
/// Taproot key spend at 57 vbytes. A fixed fee floor always applies.
pub fn estimate_fee(inputs: &[Utxo], output_count: usize, fee_rate: f64) -> u64 {
    let input_size: u64 = inputs
        .iter()
        .map(|u| {
            if u.is_p2pkh() {
                fees::P2PKH_INPUT_VBYTES
            } else {
                fees::TAPROOT_INPUT_VBYTES
            }
        })
        .sum();
    let size = input_size + output_count as u64 * fees::OUTPUT_VBYTES + fees::TX_OVERHEAD_VBYTES;
    let fee = (size as f64 * fee_rate).ceil() as u64;
    fee.max(fees::MIN_FEE_SATS)
}

/// Fee estimate for all-Taproot inputs given only the counts.
pub fn estimate_fee_for_counts(input_count: usize, output_count: usize, fee_rate: f64) -> u64 {
    let size = input_count as u64 * fees::TAPROOT_INPUT_VBYTES
        + output_count as u64 * fees::OUTPUT_VBYTES
        + fees::TX_OVERHEAD_VBYTES;
    let fee = (size as f64 * fee_rate).ceil() as u64;
    fee.max(fees::MIN_FEE_SATS)
}

/// The maximum amount sendable from `candidates` in a single one-output
/// transaction at `fee_rate`.
pub fn max_sendable(candidates: &[Utxo], fee_rate: f64) -> u64 {
    let total: u64 = candidates.iter().map(|u| u.value).sum();
    total.saturating_sub(estimate_fee(candidates, 1, fee_rate))
}

/// Stateful coin selector.
///
/// Owns the UTXO lock set and the local spent blacklist for the duration of
/// a wallet session. One selector instance must be the sole owner of its
/// lock set while a selection call is in progress.
#[derive(Debug, Default)]
pub struct CoinSelector {
    locks: UtxoLockSet,
    spent_blacklist: HashSet<String>,
}

impl CoinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select inputs for `amount` sats to `destination`, routing to sweep
    /// mode when the request is within tolerance of the maximum sendable
    /// amount. Selected inputs are locked on success.
    pub fn select(
        &mut self,
        candidates: &[Utxo],
        amount: u64,
        fee_rate: f64,
        destination: &str,
    ) -> WalletResult<TransactionPlan> {
        let pool = self.candidate_pool(candidates);
        if pool.is_empty() {
            return Err(WalletError::InsufficientFunds {
                required: amount,
                available: 0,
            });
        }

        let max_send = max_sendable(&pool, fee_rate);
        if amount.abs_diff(max_send) <= policy::SWEEP_TOLERANCE_SATS {
            return self.select_sweep(pool, fee_rate, destination);
        }
        self.select_target(pool, amount, fee_rate, destination)
    }

    /// Target-amount selection: largest-first accumulation with the fee
    /// recomputed after every addition, never emitting dust change.
    fn select_target(
        &mut self,
        mut pool: Vec<Utxo>,
        amount: u64,
        fee_rate: f64,
        destination: &str,
    ) -> WalletResult<TransactionPlan> {
        pool.sort_by(|a, b| b.value.cmp(&a.value));

        let mut selected: Vec<Utxo> = Vec::new();
        let mut total: u64 = 0;

        for utxo in pool {
            total += utxo.value;
            selected.push(utxo);

            let fee = estimate_fee(&selected, 2, fee_rate);
            if total >= amount + fee {
                let change = total - amount - fee;
                if change > 0 && change < policy::DUST_THRESHOLD_SATS {
                    // Dust change: keep accumulating for a cleaner fit.
                    continue;
                }
                debug!(
                    "selected {} inputs, {} sats total, fee {}, change {}",
                    selected.len(),
                    total,
                    fee,
                    change
                );
                let plan = TransactionPlan::new(selected, fee, change, destination, amount)?;
                self.locks.lock_all(&plan.input_ids());
                return Ok(plan);
            }
        }

        // The full pool is in. Absorb a dust remainder into the fee rather
        // than emit it as change.
        let fee = estimate_fee(&selected, 2, fee_rate);
        if total >= amount + fee {
            let change = total - amount - fee;
            let (fee, change) = if change < policy::DUST_THRESHOLD_SATS {
                (total - amount, 0)
            } else {
                (fee, change)
            };
            let plan = TransactionPlan::new(selected, fee, change, destination, amount)?;
            self.locks.lock_all(&plan.input_ids());
            return Ok(plan);
        }

        Err(WalletError::InsufficientFunds {
            required: amount + fee,
            available: total,
        })
    }

    /// Sweep mode: spend every candidate with a single output, no change.
    fn select_sweep(
        &mut self,
        pool: Vec<Utxo>,
        fee_rate: f64,
        destination: &str,
    ) -> WalletResult<TransactionPlan> {
        let total: u64 = pool.iter().map(|u| u.value).sum();
        let fee = estimate_fee(&pool, 1, fee_rate);
        if total <= fee {
            return Err(WalletError::InsufficientFunds {
                required: fee,
                available: total,
            });
        }
        let adjusted_amount = total - fee;
        info!(
            "sweep: {} inputs, {} sats total, fee {}, sending {}",
            pool.len(),
            total,
            fee,
            adjusted_amount
        );
        let plan = TransactionPlan::new(pool, fee, 0, destination, adjusted_amount)?;
        self.locks.lock_all(&plan.input_ids());
        Ok(plan)
    }

    /// Select with online liveness verification.
    ///
    /// Every candidate is checked against the oracle concurrently before
    /// selection. A UTXO confirmed spent is dropped from the pool,
    /// blacklisted and reported to storage for removal; a failed check is
    /// treated as "assume unspent" so one flaky lookup cannot block a
    /// legitimate transaction.
    pub async fn select_verified<O, S>(
        &mut self,
        oracle: &O,
        storage: &S,
        candidates: &[Utxo],
        amount: u64,
        fee_rate: f64,
        destination: &str,
        params: &NetworkParams,
    ) -> WalletResult<TransactionPlan>
    where
        O: LivenessOracle,
        S: Storage,
    {
        let pool = self.candidate_pool(candidates);
        let verified = self.verify_candidates(oracle, storage, pool, params).await;
        self.select(&verified, amount, fee_rate, destination)
    }

    /// Re-check an already-selected plan against the liveness oracle.
    ///
    /// Used after signing, before broadcast: any input found spent unlocks
    /// the plan and raises `DoubleSpendDetected`, forcing re-selection.
    /// The transaction is never silently resubmitted.
    pub async fn recheck_plan<O, S>(
        &mut self,
        oracle: &O,
        storage: &S,
        plan: &TransactionPlan,
        params: &NetworkParams,
    ) -> WalletResult<()>
    where
        O: LivenessOracle,
        S: Storage,
    {
        let checks = plan
            .selected_utxos
            .iter()
            .map(|u| oracle.is_utxo_spent(&u.txid, u.vout, params));
        let results = join_all(checks).await;

        for (utxo, result) in plan.selected_utxos.iter().zip(results) {
            if let Ok(true) = result {
                let id = utxo.id();
                warn!("input {} spent out from under a signed transaction", id);
                self.unlock_plan(plan);
                self.mark_spent(storage, &id, params);
                return Err(WalletError::DoubleSpendDetected {
                    utxo_id: id.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn verify_candidates<O, S>(
        &mut self,
        oracle: &O,
        storage: &S,
        candidates: Vec<Utxo>,
        params: &NetworkParams,
    ) -> Vec<Utxo>
    where
        O: LivenessOracle,
        S: Storage,
    {
        let checks = candidates
            .iter()
            .map(|u| oracle.is_utxo_spent(&u.txid, u.vout, params));
        let results = join_all(checks).await;

        let mut kept = Vec::with_capacity(candidates.len());
        for (utxo, result) in candidates.into_iter().zip(results) {
            match result {
                Ok(false) => kept.push(utxo),
                Ok(true) => {
                    let id = utxo.id();
                    info!("dropping spent input {} from the candidate pool", id);
                    self.mark_spent(storage, &id, params);
                }
                Err(e) => {
                    warn!(
                        "liveness check failed for {}, assuming unspent: {}",
                        utxo.id(),
                        e
                    );
                    kept.push(utxo);
                }
            }
        }
        kept
    }

    fn mark_spent<S: Storage>(&mut self, storage: &S, id: &UtxoId, params: &NetworkParams) {
        self.spent_blacklist.insert(id.to_string());
        if let Err(e) = storage.remove_utxo(id, params) {
            warn!("failed to remove spent UTXO {} from storage: {}", id, e);
        }
    }

    fn candidate_pool(&self, candidates: &[Utxo]) -> Vec<Utxo> {
        candidates
            .iter()
            .filter(|u| {
                let key = u.id().to_string();
                !self.locks.is_locked(&u.id()) && !self.spent_blacklist.contains(&key)
            })
            .cloned()
            .collect()
    }

    /// Release the locks held by an aborted or cancelled plan.
    pub fn unlock_plan(&mut self, plan: &TransactionPlan) {
        self.locks.unlock_all(&plan.input_ids());
    }

    /// Drop every lock (wallet reset).
    pub fn clear_locks(&mut self) {
        self.locks.clear();
    }

    pub fn is_locked(&self, id: &UtxoId) -> bool {
        self.locks.is_locked(id)
    }

    pub fn locked_count(&self) -> usize {
        self.locks.len()
    }

    /// The lock set, for classification calls that need it.
    pub fn locks(&self) -> &UtxoLockSet {
        &self.locks
    }
}
