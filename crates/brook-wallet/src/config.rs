//! HD wallet configuration.

use bitcoin::Network;

use brook_core::constants::DEFAULT_GAP_LIMIT;
use brook_core::types::AddressType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    /// Consecutive unused addresses scanned past the frontier.
    pub gap_limit: u32,
    pub address_type: AddressType,
    pub network: Network,
    /// BIP44-style account index (hardened).
    pub account: u32,
    /// Explicit BIP44 coin type; derived from the network when unset.
    pub coin_type: Option<u32>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            gap_limit: DEFAULT_GAP_LIMIT,
            address_type: AddressType::NativeSegwit,
            network: Network::Bitcoin,
            account: 0,
            coin_type: None,
        }
    }
}

impl WalletConfig {
    pub fn mainnet(address_type: AddressType) -> Self {
        Self {
            address_type,
            ..Self::default()
        }
    }

    pub fn testnet(address_type: AddressType) -> Self {
        Self {
            address_type,
            network: Network::Testnet,
            ..Self::default()
        }
    }

    /// Keys for a sidechain that shares bitcoin's key format but registers
    /// its own coin type (e.g. 1776 for Liquid).
    pub fn sidechain(address_type: AddressType, coin_type: u32) -> Self {
        Self {
            address_type,
            coin_type: Some(coin_type),
            ..Self::default()
        }
    }

    /// BIP44 coin type: 0 on mainnet, 1 on every test network.
    pub fn coin_type(&self) -> u32 {
        match (self.coin_type, self.network) {
            (Some(explicit), _) => explicit,
            (None, Network::Bitcoin) => 0,
            (None, _) => 1,
        }
    }

    /// Account derivation path, e.g. `m/84'/0'/0'`.
    pub fn account_path(&self) -> String {
        format!(
            "m/{}'/{}'/{}'",
            self.address_type.purpose(),
            self.coin_type(),
            self.account
        )
    }
}
