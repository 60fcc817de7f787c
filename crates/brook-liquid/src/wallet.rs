//! Confidential wallet state: keys, blinding keys, the unblinding cache and
//! the spendable set.
//!
//! [`LiquidWallet::sync`] is the only writer of the caches. It discovers
//! the address frontier, fetches every new transaction touching the
//! wallet, opens the outputs paying to wallet scripts, and joins the
//! server's unspent list with what it could open.

use std::collections::{BTreeMap, HashMap, HashSet};

use bitcoin::secp256k1::{All, PublicKey, Secp256k1};
use bitcoin::{OutPoint, PrivateKey, Script, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use brook_core::constants::LIQUID_COIN_TYPE;
use brook_core::traits::ChainIndex;
use brook_core::types::{AddressType, AssetId, Chain, ScriptHash, Utxo};
use brook_wallet::config::WalletConfig;
use brook_wallet::hd_index::HdAddressIndex;
use brook_wallet::keys::AccountKeys;
use brook_wallet::mnemonic::mnemonic_to_seed;

use crate::backend::{ProofBackend, UnblindingData};
use crate::blinding::MasterBlindingKey;
use crate::error::LiquidError;

/// A spendable output whose commitments the wallet has opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidUtxo {
    pub outpoint: OutPoint,
    pub script_pubkey: ScriptBuf,
    /// Confirmation height (0 when unconfirmed).
    pub height: i64,
    pub unblinded: UnblindingData,
}

impl LiquidUtxo {
    pub fn asset(&self) -> AssetId {
        self.unblinded.asset
    }

    pub fn value(&self) -> u64 {
        self.unblinded.value
    }

    /// View as a plain output for the value-only selector. The address
    /// field carries the script hex.
    pub fn as_plain(&self) -> Utxo {
        Utxo {
            txid: self.outpoint.txid,
            vout: self.outpoint.vout,
            value: self.value(),
            address: self.script_pubkey.to_hex_string(),
            height: self.height,
        }
    }
}

/// A wallet script together with the key that blinds outputs to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfidentialDestination {
    pub chain: Chain,
    pub index: u32,
    pub script_pubkey: ScriptBuf,
    pub blinding_key: PublicKey,
}

/// Outcome of one [`LiquidWallet::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub new_transactions: usize,
    pub unblinded_outputs: usize,
    pub utxos: usize,
}

pub struct LiquidWallet {
    hd: HdAddressIndex,
    master_blinding: MasterBlindingKey,
    secp: Secp256k1<All>,
    unblinded: HashMap<OutPoint, UnblindingData>,
    /// Script and transaction pairs already examined. A transaction seen
    /// again under a newly scanned script is opened again.
    processed: HashSet<(ScriptHash, Txid)>,
    utxos: Vec<LiquidUtxo>,
}

impl LiquidWallet {
    pub fn new(hd: HdAddressIndex, master_blinding: MasterBlindingKey) -> Self {
        Self {
            hd,
            master_blinding,
            secp: Secp256k1::new(),
            unblinded: HashMap::new(),
            processed: HashSet::new(),
            utxos: Vec::new(),
        }
    }

    /// Spending wallet from a BIP39 phrase. Keys use coin type 1776; the
    /// master blinding key comes from the same seed.
    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        address_type: AddressType,
        gap_limit: u32,
    ) -> Result<Self, LiquidError> {
        let config = WalletConfig {
            gap_limit,
            ..WalletConfig::sidechain(address_type, LIQUID_COIN_TYPE)
        };
        let seed = mnemonic_to_seed(phrase, passphrase)?;
        let keys = AccountKeys::from_seed(&seed, &config)?;
        let master = MasterBlindingKey::from_seed(&seed);
        Ok(Self::new(HdAddressIndex::new(keys, &config), master))
    }

    /// Watch-only wallet from an account xpub and the master blinding key.
    pub fn watch_only(
        xpub: &str,
        master_blinding: MasterBlindingKey,
        address_type: AddressType,
        gap_limit: u32,
    ) -> Result<Self, LiquidError> {
        let config = WalletConfig {
            gap_limit,
            ..WalletConfig::sidechain(address_type, LIQUID_COIN_TYPE)
        };
        let hd = HdAddressIndex::from_xpub(xpub, &config)?;
        Ok(Self::new(hd, master_blinding))
    }

    pub fn hd(&self) -> &HdAddressIndex {
        &self.hd
    }

    pub fn hd_mut(&mut self) -> &mut HdAddressIndex {
        &mut self.hd
    }

    pub fn master_blinding_key(&self) -> &MasterBlindingKey {
        &self.master_blinding
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    pub fn destination(
        &mut self,
        chain: Chain,
        index: u32,
    ) -> Result<ConfidentialDestination, LiquidError> {
        let derived = self.hd.derive(chain, index)?;
        let blinding_key = self
            .master_blinding
            .blinding_public_key(&self.secp, &derived.script_pubkey)?;
        Ok(ConfidentialDestination {
            chain,
            index,
            script_pubkey: derived.script_pubkey,
            blinding_key,
        })
    }

    /// Receive destination at the cached external frontier.
    pub fn receive_destination(&mut self) -> Result<ConfidentialDestination, LiquidError> {
        let index = self.hd.next_free_index(Chain::External);
        self.destination(Chain::External, index)
    }

    /// Change destination at the cached internal frontier.
    pub fn change_destination(&mut self) -> Result<ConfidentialDestination, LiquidError> {
        let index = self.hd.next_free_index(Chain::Internal);
        self.destination(Chain::Internal, index)
    }

    pub fn private_key_for_script(&mut self, script: &Script) -> Result<PrivateKey, LiquidError> {
        Ok(self.hd.private_key_for_script(script)?)
    }

    pub fn utxos(&self) -> &[LiquidUtxo] {
        &self.utxos
    }

    /// Replace the spendable set, sorted by outpoint.
    pub fn set_utxos(&mut self, mut utxos: Vec<LiquidUtxo>) {
        utxos.sort_by_key(|u| u.outpoint);
        for u in &utxos {
            self.unblinded.insert(u.outpoint, u.unblinded);
        }
        self.utxos = utxos;
    }

    pub fn unblinding_data(&self, outpoint: &OutPoint) -> Option<&UnblindingData> {
        self.unblinded.get(outpoint)
    }

    /// Spendable value per asset.
    pub fn balances(&self) -> BTreeMap<AssetId, u64> {
        let mut balances = BTreeMap::new();
        for utxo in &self.utxos {
            *balances.entry(utxo.asset()).or_insert(0u64) += utxo.value();
        }
        balances
    }

    /// Refresh frontiers, the unblinding cache and the spendable set.
    pub async fn sync(
        &mut self,
        index: &dyn ChainIndex,
        backend: &dyn ProofBackend,
    ) -> Result<SyncReport, LiquidError> {
        self.hd.rescan(index).await?;

        let window = self.hd.scan_window()?;
        let scripthashes: Vec<ScriptHash> = window.iter().map(|d| d.scripthash).collect();
        let owned: HashSet<&ScriptBuf> = window.iter().map(|d| &d.script_pubkey).collect();

        let histories = index.multi_get_history(&scripthashes).await?;
        let unseen: Vec<(ScriptHash, Txid)> = histories
            .iter()
            .flat_map(|(sh, entries)| entries.iter().map(|h| (*sh, h.tx_hash)))
            .filter(|pair| !self.processed.contains(pair))
            .collect();
        let mut fresh: Vec<Txid> = unseen.iter().map(|(_, txid)| *txid).collect();
        fresh.sort();
        fresh.dedup();

        let mut report = SyncReport {
            new_transactions: fresh.len(),
            ..SyncReport::default()
        };

        for txid in fresh {
            let raw = index.get_raw_transaction(&txid).await?;
            let decoded = backend.decode_transaction(&raw).await?;
            for output in decoded.outputs.iter().filter(|o| owned.contains(&o.script_pubkey)) {
                let data = match output.explicit() {
                    Some(data) => data,
                    None => {
                        let key = self.master_blinding.blinding_private_key(&output.script_pubkey)?;
                        match backend.unblind(output, &key).await {
                            Ok(data) => data,
                            Err(e) => {
                                warn!(%txid, vout = output.vout, error = %e, "cannot unblind wallet output");
                                continue;
                            }
                        }
                    }
                };
                if self.unblinded.insert(OutPoint::new(txid, output.vout), data).is_none() {
                    report.unblinded_outputs += 1;
                }
            }
        }
        self.processed.extend(unseen);

        let unspent = index.multi_list_unspent(&scripthashes).await?;
        let by_hash: HashMap<ScriptHash, &ScriptBuf> =
            window.iter().map(|d| (d.scripthash, &d.script_pubkey)).collect();
        let mut utxos = Vec::new();
        for (scripthash, entries) in &unspent {
            let Some(script) = by_hash.get(scripthash) else {
                continue;
            };
            for entry in entries {
                let outpoint = entry.outpoint();
                match self.unblinded.get(&outpoint) {
                    Some(data) => utxos.push(LiquidUtxo {
                        outpoint,
                        script_pubkey: (*script).clone(),
                        height: entry.height.max(0),
                        unblinded: *data,
                    }),
                    None => debug!(%outpoint, "unspent output without unblinding data"),
                }
            }
        }
        utxos.sort_by_key(|u| u.outpoint);
        report.utxos = utxos.len();
        self.utxos = utxos;

        info!(
            new_transactions = report.new_transactions,
            unblinded = report.unblinded_outputs,
            utxos = report.utxos,
            "confidential sync complete"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for LiquidWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidWallet")
            .field("hd", &self.hd)
            .field("unblinded", &self.unblinded.len())
            .field("utxos", &self.utxos.len())
            .finish_non_exhaustive()
    }
}
