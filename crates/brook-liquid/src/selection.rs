//! Per-asset coin selection.
//!
//! Each asset is selected independently with the plain selector at a zero
//! fee rate; the fee is paid separately in the policy asset by the engine.

use std::collections::{BTreeMap, HashSet};

use bitcoin::secp256k1::PublicKey;
use bitcoin::{OutPoint, ScriptBuf};
use tracing::debug;

use brook_core::types::{AssetId, Utxo};
use brook_wallet::coin_selection::{CoinSelector, OutputTarget};
use brook_wallet::sizing::LegacySizing;
use brook_wallet::error::WalletError;

use crate::error::LiquidError;
use crate::wallet::LiquidUtxo;

/// A requested payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidTarget {
    pub script_pubkey: ScriptBuf,
    /// Receiver's blinding pubkey; `None` sends unblinded.
    pub blinding_key: Option<PublicKey>,
    pub asset: AssetId,
    pub amount: u64,
}

/// Inputs chosen for one asset, and what is left over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSelection {
    pub asset: AssetId,
    pub target: u64,
    pub utxos: Vec<LiquidUtxo>,
    /// Same-asset residual returned to the wallet.
    pub change: Option<u64>,
}

impl AssetSelection {
    pub fn selected(&self) -> u64 {
        self.utxos.iter().map(LiquidUtxo::value).sum()
    }
}

/// Sum target amounts per asset, ordered by asset id.
pub fn merge_targets(targets: &[LiquidTarget]) -> Result<BTreeMap<AssetId, u64>, LiquidError> {
    let mut merged = BTreeMap::new();
    for target in targets {
        if target.amount == 0 {
            return Err(LiquidError::InvalidTarget(format!(
                "zero amount for asset {}",
                target.asset
            )));
        }
        let sum: &mut u64 = merged.entry(target.asset).or_default();
        *sum = sum.checked_add(target.amount).ok_or_else(|| {
            LiquidError::InvalidTarget(format!("amount overflow for asset {}", target.asset))
        })?;
    }
    Ok(merged)
}

/// Select `amount` of `asset` from `utxos`, skipping `exclude`.
///
/// A target equal to the whole balance takes every output and leaves no
/// change.
pub fn select_asset(
    utxos: &[LiquidUtxo],
    asset: AssetId,
    amount: u64,
    exclude: &HashSet<OutPoint>,
) -> Result<AssetSelection, LiquidError> {
    let candidates: Vec<&LiquidUtxo> = utxos
        .iter()
        .filter(|u| u.asset() == asset && !exclude.contains(&u.outpoint))
        .collect();
    let balance: u64 = candidates.iter().map(|u| u.value()).sum();

    if candidates.is_empty() || balance < amount {
        return Err(LiquidError::CoinSelection {
            asset,
            target: amount,
            selected: balance,
        });
    }

    if balance == amount {
        debug!(%asset, amount, inputs = candidates.len(), "selecting whole balance");
        return Ok(AssetSelection {
            asset,
            target: amount,
            utxos: candidates.into_iter().cloned().collect(),
            change: None,
        });
    }

    let plain: Vec<Utxo> = candidates.iter().map(|u| u.as_plain()).collect();
    let selection = CoinSelector::<LegacySizing>::default()
        .select(&plain, &[OutputTarget::script(ScriptBuf::new(), amount)], 0)
        .map_err(|e| match e {
            WalletError::CoinSelection { target, selected } => LiquidError::CoinSelection {
                asset,
                target,
                selected,
            },
            other => other.into(),
        })?;

    let chosen: HashSet<OutPoint> = selection.inputs.iter().map(Utxo::outpoint).collect();
    let selected: Vec<LiquidUtxo> = candidates
        .into_iter()
        .filter(|u| chosen.contains(&u.outpoint))
        .cloned()
        .collect();
    let change = selection.change().map(|c| c.value).filter(|v| *v > 0);

    debug!(%asset, amount, inputs = selected.len(), change, "asset selected");
    Ok(AssetSelection {
        asset,
        target: amount,
        utxos: selected,
        change,
    })
}

/// Merge `targets` by asset and select each one.
pub fn select_per_asset(
    utxos: &[LiquidUtxo],
    targets: &[LiquidTarget],
) -> Result<Vec<AssetSelection>, LiquidError> {
    let merged = merge_targets(targets)?;
    let none = HashSet::new();
    merged
        .into_iter()
        .map(|(asset, amount)| select_asset(utxos, asset, amount, &none))
        .collect()
}
