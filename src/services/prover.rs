//! # Prover Client
//!
//! Sends prove requests to the external proving service and turns the
//! response into candidate transactions.
//!
//! Transient failures (HTTP 5xx, timeouts, connection errors) are retried
//! indefinitely on a progressive delay schedule with jitter; 4xx responses,
//! JSON parse failures and response-shape violations are terminal and
//! surfaced immediately. Cancellation is the caller's concern: no timeout
//! is imposed on the retry loop itself.

use crate::config::prover as prover_config;
use crate::error::{WalletError, WalletResult};
use crate::network::NetworkParams;
use crate::spell::Spell;
use crate::types::Utxo;
use log::{info, warn};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Request body for the prover endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProvePayload {
    pub spell: Spell,
    /// App binaries by verification key; empty for plain transfers.
    pub binaries: BTreeMap<String, String>,
    /// Raw hex of the transactions creating the spell inputs.
    pub prev_txs: Vec<String>,
    /// Funding UTXO as `<txid>:<vout>`.
    pub funding_utxo: String,
    pub funding_utxo_value: u64,
    pub change_address: String,
    pub fee_rate: f64,
    /// Chain name the prover expects, from `NetworkParams::chain_name`.
    pub chain: String,
}

/// Successful prover exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProveOutcome {
    /// Transaction hex strings as returned by the prover.
    pub transactions: Vec<String>,
    /// 1-based attempt number that succeeded.
    pub attempts: u32,
}

impl ProveOutcome {
    /// A two-element response is `(commit_tx, spell_tx)`.
    pub fn commit_and_spell(&self) -> Option<(&str, &str)> {
        match self.transactions.as_slice() {
            [commit, spell, ..] => Some((commit.as_str(), spell.as_str())),
            _ => None,
        }
    }
}

/// Assemble a prove payload from a composed spell and its funding UTXO.
///
/// The funding UTXO's own address doubles as the change address. The
/// creating transactions of the spell inputs (`prev_txs`) are fetched by
/// the explorer collaborator and passed in as raw hex.
pub fn build_payload(
    spell: Spell,
    funding_utxo: &Utxo,
    prev_txs: Vec<String>,
    fee_rate: f64,
    params: &NetworkParams,
) -> WalletResult<ProvePayload> {
    let change_address = funding_utxo
        .address
        .clone()
        .ok_or_else(|| WalletError::spell("funding UTXO has no address for change"))?;

    let payload = ProvePayload {
        spell,
        binaries: BTreeMap::new(),
        prev_txs,
        funding_utxo: funding_utxo.id().to_string(),
        funding_utxo_value: funding_utxo.value,
        change_address,
        fee_rate,
        chain: params.chain_name().to_string(),
    };
    validate_payload(&payload)?;
    Ok(payload)
}

/// Validate a payload before it leaves the wallet.
///
/// Structural defects here are programming or data-corruption errors, so
/// they are terminal: the prover is never asked to reject them for us.
pub fn validate_payload(payload: &ProvePayload) -> WalletResult<()> {
    let spell = &payload.spell;
    if spell.version == 0 {
        return Err(WalletError::spell("missing spell.version"));
    }
    if spell.apps.is_empty() {
        return Err(WalletError::spell("missing or empty spell.apps"));
    }
    if spell.ins.is_empty() {
        return Err(WalletError::spell("missing or empty spell.ins"));
    }
    if spell.outs.is_empty() {
        return Err(WalletError::spell("missing or empty spell.outs"));
    }
    if !is_utxo_id(&spell.ins[0].utxo_id) {
        return Err(WalletError::spell(format!(
            "ins[0].utxo_id must be <txid>:<vout>, got {}",
            spell.ins[0].utxo_id
        )));
    }
    if !is_utxo_id(&payload.funding_utxo) {
        return Err(WalletError::spell(format!(
            "funding_utxo must be <txid>:<vout>, got {}",
            payload.funding_utxo
        )));
    }
    if payload.funding_utxo_value == 0 {
        return Err(WalletError::spell("funding_utxo_value must be positive"));
    }
    if payload.prev_txs.iter().any(|tx| !is_hex(tx)) {
        return Err(WalletError::spell("prev_txs entries must be hex"));
    }
    if payload.change_address.len() < 20 {
        return Err(WalletError::spell("change_address appears invalid"));
    }
    Ok(())
}

/// Validate the prover response: a non-empty array of hex strings.
pub fn validate_response(value: &Value) -> WalletResult<Vec<String>> {
    let array = value
        .as_array()
        .ok_or_else(|| WalletError::ProverTerminal {
            message: "prover response is not an array of transactions".to_string(),
        })?;
    if array.is_empty() {
        return Err(WalletError::ProverTerminal {
            message: "prover response is empty".to_string(),
        });
    }

    let mut transactions = Vec::with_capacity(array.len());
    for (index, item) in array.iter().enumerate() {
        let tx = item.as_str().ok_or_else(|| WalletError::ProverTerminal {
            message: format!("transaction {index} is not a string"),
        })?;
        if !is_hex(tx) {
            return Err(WalletError::ProverTerminal {
                message: format!("transaction {index} is not valid hex"),
            });
        }
        transactions.push(tx.to_string());
    }
    Ok(transactions)
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_utxo_id(s: &str) -> bool {
    let Some((txid, vout)) = s.split_once(':') else {
        return false;
    };
    txid.len() == 64
        && txid.chars().all(|c| c.is_ascii_hexdigit())
        && !vout.is_empty()
        && vout.chars().all(|c| c.is_ascii_digit())
}

/// Delay before the next attempt: progressive schedule, capped at the last
/// entry, with jitter to avoid thundering herds.
fn retry_delay(attempt: u32) -> Duration {
    let index = (attempt.saturating_sub(1) as usize).min(prover_config::RETRY_DELAYS_MS.len() - 1);
    let base = prover_config::RETRY_DELAYS_MS[index] as f64;
    let jitter = base
        * prover_config::RETRY_JITTER_RATIO
        * (rand::rng().random_range(-0.5..0.5));
    let delayed = (base + jitter).max(prover_config::MIN_RETRY_DELAY_MS as f64);
    Duration::from_millis(delayed as u64)
}

/// HTTP client for the prover endpoint.
#[derive(Debug, Clone)]
pub struct ProverClient {
    client: Client,
    url: String,
}

impl ProverClient {
    /// Create a client for the given endpoint URL. No request timeout is
    /// set: proving legitimately takes minutes and the retry loop is
    /// cancelable at a higher layer.
    pub fn new(url: impl Into<String>) -> WalletResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| WalletError::Network { source: e })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Send a prove request, retrying transient failures until a terminal
    /// answer arrives.
    pub async fn prove(&self, payload: &ProvePayload) -> WalletResult<ProveOutcome> {
        validate_payload(payload)?;

        let mut attempt: u32 = 1;
        loop {
            info!("prover attempt {} -> {}", attempt, self.url);
            match self.attempt_once(payload).await {
                Ok(transactions) => {
                    info!("prover succeeded on attempt {}", attempt);
                    return Ok(ProveOutcome {
                        transactions,
                        attempts: attempt,
                    });
                }
                Err(error) if error.is_retryable() => {
                    let delay = retry_delay(attempt);
                    warn!(
                        "prover attempt {} failed ({}), retrying in {:?}",
                        attempt, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn attempt_once(&self, payload: &ProvePayload) -> WalletResult<Vec<String>> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WalletError::ProverTransient {
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WalletError::ProverTransient {
                message: format!("failed to read response body: {e}"),
            })?;

        classify_status(status, &body)?;

        let value: Value = serde_json::from_str(&body).map_err(|e| WalletError::ProverTerminal {
            message: format!("response is not JSON: {e}"),
        })?;
        validate_response(&value)
    }
}

/// Map an HTTP status to the retry policy: 5xx is transient, any other
/// non-success (including 429) is terminal.
fn classify_status(status: StatusCode, body: &str) -> WalletResult<()> {
    if status.is_server_error() {
        return Err(WalletError::ProverTransient {
            message: format!("prover returned {status}: {body}"),
        });
    }
    if !status.is_success() {
        return Err(WalletError::ProverTerminal {
            message: format!("prover returned {status}: {body}"),
        });
    }
    Ok(())
}
