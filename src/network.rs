//! # Network Parameters
//!
//! Explicit network selection threaded through every derivation, signing and
//! composition call. The core never reads ambient network configuration.

use crate::error::{WalletError, WalletResult};
use bitcoin::{Address, Network};
use std::str::FromStr;

/// Network parameters for one wallet operation.
///
/// Carries the Bitcoin network, the BIP44/BIP86 coin type and the chain name
/// the prover endpoint expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    /// Bitcoin network (address encoding, consensus rules)
    pub network: Network,
    /// BIP86 coin type: 0 for mainnet, 1 for every test network
    pub coin_type: u32,
}

impl NetworkParams {
    /// Mainnet parameters
    pub const fn mainnet() -> Self {
        Self {
            network: Network::Bitcoin,
            coin_type: 0,
        }
    }

    /// Testnet parameters
    pub const fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            coin_type: 1,
        }
    }

    /// Signet parameters
    pub const fn signet() -> Self {
        Self {
            network: Network::Signet,
            coin_type: 1,
        }
    }

    /// Regtest parameters
    pub const fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            coin_type: 1,
        }
    }

    /// Build parameters from a `bitcoin::Network`
    pub fn from_network(network: Network) -> Self {
        match network {
            Network::Bitcoin => Self::mainnet(),
            Network::Testnet => Self::testnet(),
            Network::Signet => Self::signet(),
            Network::Regtest => Self::regtest(),
            _ => Self::testnet(),
        }
    }

    /// Chain name as the prover API expects it
    pub fn chain_name(&self) -> &'static str {
        match self.network {
            Network::Bitcoin => "bitcoin",
            Network::Testnet => "testnet4",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
            _ => "bitcoin",
        }
    }

    pub fn is_mainnet(&self) -> bool {
        self.network == Network::Bitcoin
    }
}

/// Validate and parse an address string for the given network.
///
/// Rejects both unparseable addresses and addresses of the wrong network.
pub fn validate_address(address_str: &str, params: &NetworkParams) -> WalletResult<Address> {
    let address = Address::from_str(address_str).map_err(|_| WalletError::InvalidAddress {
        address: address_str.to_string(),
    })?;

    address
        .require_network(params.network)
        .map_err(|_| WalletError::InvalidAddress {
            address: address_str.to_string(),
        })
}
