//! Wallet error types.

use brook_core::error::ChainError;
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The available outputs cannot cover the targets plus fee.
    #[error("coin selection failed: target {target}, selected {selected}")]
    CoinSelection {
        /// Sum of requested output values plus the fee at that point.
        target: u64,
        /// Value actually accumulated before giving up.
        selected: u64,
    },

    /// No UTXOs available for spending.
    #[error("no UTXOs available")]
    NoUtxos,

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid address string.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid BIP-39 mnemonic phrase.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Key derivation failure.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    /// No wallet key controls the given address.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Operation needs private keys but the wallet only has an xpub.
    #[error("watch-only wallet cannot sign")]
    WatchOnly,

    /// Signature creation failed.
    #[error("signing: {0}")]
    Signing(String),

    /// Transaction build error.
    #[error("build error: {0}")]
    BuildError(String),

    /// Failure talking to the indexing server.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::error::RpcError;

    #[test]
    fn display_coin_selection() {
        let e = WalletError::CoinSelection {
            target: 200,
            selected: 100,
        };
        assert_eq!(e.to_string(), "coin selection failed: target 200, selected 100");
    }

    #[test]
    fn display_no_utxos() {
        assert_eq!(WalletError::NoUtxos.to_string(), "no UTXOs available");
    }

    #[test]
    fn from_chain_error() {
        let chain = ChainError::Rpc(RpcError::NotConnected);
        let wallet: WalletError = chain.clone().into();
        assert_eq!(wallet, WalletError::Chain(chain));
        assert_eq!(wallet.to_string(), "not connected");
    }
}
