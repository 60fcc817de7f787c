//! Confidential-engine error types.

use brook_core::error::ChainError;
use brook_core::types::AssetId;
use brook_wallet::error::WalletError;
use thiserror::Error;

use crate::pset::PsetStage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiquidError {
    /// Unspent outputs of `asset` cannot cover the requested amount.
    #[error("coin selection failed for asset {asset}: target {target}, selected {selected}")]
    CoinSelection {
        asset: AssetId,
        target: u64,
        selected: u64,
    },

    #[error("blinding: {0}")]
    Blinding(String),

    #[error("signing: {0}")]
    Signing(String),

    /// The transaction has been extracted; nothing more can be done to it.
    #[error("transaction already finalized")]
    Finalized,

    /// An operation was attempted at the wrong stage.
    #[error("cannot {operation} a {stage:?} transaction")]
    InvalidStage {
        operation: &'static str,
        stage: PsetStage,
    },

    /// Proof library failure outside blinding and signing.
    #[error("proof backend: {0}")]
    Backend(String),

    /// The fee loop did not settle on a fee its own size could pay for.
    #[error("fee did not converge after {iterations} iterations")]
    FeeConvergence { iterations: u32 },

    #[error("asset registry: {0}")]
    Registry(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::error::RpcError;

    #[test]
    fn display_coin_selection_names_asset() {
        let e = LiquidError::CoinSelection {
            asset: AssetId::from_bytes([0xab; 32]),
            target: 25_000,
            selected: 20_000,
        };
        let text = e.to_string();
        assert!(text.contains(&"ab".repeat(32)));
        assert!(text.ends_with("target 25000, selected 20000"));
    }

    #[test]
    fn display_stage() {
        let e = LiquidError::InvalidStage {
            operation: "add inputs to",
            stage: PsetStage::Blinded,
        };
        assert_eq!(e.to_string(), "cannot add inputs to a Blinded transaction");
    }

    #[test]
    fn from_lower_layers() {
        let e: LiquidError = WalletError::NoUtxos.into();
        assert_eq!(e, LiquidError::Wallet(WalletError::NoUtxos));
        let e: LiquidError = ChainError::Rpc(RpcError::NotConnected).into();
        assert_eq!(e.to_string(), "not connected");
    }
}
