//! # brook-wallet: HD address index, coin selection and transaction building.
//!
//! Derives BIP84/BIP49 account keys from a mnemonic or extended public key,
//! discovers used and free addresses with a gap-limit scan against a
//! [`ChainIndex`](brook_core::traits::ChainIndex), selects coins
//! deterministically and builds signed segwit transactions.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`config`]: gap limit, address type, network
//! - [`mnemonic`]: BIP-39 phrase handling
//! - [`keys`]: Seed, account keys, SLIP-132 extended keys
//! - [`hd_index`]: gap-limit discovery, balance/UTXO caches, key lookup
//! - [`sizing`]: script-size strategies per address type
//! - [`coin_selection`]: blackjack / accumulative / split selection
//! - [`builder`]: transaction builder with signing

pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod error;
pub mod hd_index;
pub mod keys;
pub mod mnemonic;
pub mod sizing;

// Re-exports for convenient access
pub use builder::{SignedTransaction, TransactionBuilder, UnsignedTransaction};
pub use coin_selection::{CoinSelection, CoinSelector, Destination, OutputTarget, SelectedOutput};
pub use config::WalletConfig;
pub use error::WalletError;
pub use hd_index::{DerivedAddress, HdAddressIndex};
pub use keys::{AccountKeys, Seed};
pub use mnemonic::{generate_mnemonic, is_valid_mnemonic, mnemonic_to_seed};
pub use sizing::{LegacySizing, ScriptSizing};
