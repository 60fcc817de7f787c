//! HD address index: gap-limit discovery, balance and UTXO caches, and the
//! address → key reverse lookup.
//!
//! An [`HdAddressIndex`] is a per-wallet session object. It owns the
//! derivation state (next free index on each chain, derived-address caches)
//! and queries the indexing server through a borrowed [`ChainIndex`].

use std::collections::HashMap;

use bitcoin::{PrivateKey, Script, ScriptBuf};
use tracing::{debug, info};

use brook_core::traits::ChainIndex;
use brook_core::types::{Balance, Chain, ScriptHash, Utxo};

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::keys::AccountKeys;

/// An address derived at `chain/index`, with its script and scripthash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub chain: Chain,
    pub index: u32,
    pub address: String,
    pub script_pubkey: ScriptBuf,
    pub scripthash: ScriptHash,
}

pub struct HdAddressIndex {
    keys: AccountKeys,
    gap_limit: u32,
    next_free: HashMap<Chain, u32>,
    derived: HashMap<(Chain, u32), DerivedAddress>,
    paths: HashMap<String, (Chain, u32)>,
    key_memo: HashMap<String, PrivateKey>,
    balances: HashMap<String, Balance>,
    utxos: Vec<Utxo>,
}

impl HdAddressIndex {
    pub fn new(keys: AccountKeys, config: &WalletConfig) -> Self {
        Self {
            keys,
            gap_limit: config.gap_limit.max(1),
            next_free: HashMap::from([(Chain::External, 0), (Chain::Internal, 0)]),
            derived: HashMap::new(),
            paths: HashMap::new(),
            key_memo: HashMap::new(),
            balances: HashMap::new(),
            utxos: Vec::new(),
        }
    }

    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        config: &WalletConfig,
    ) -> Result<Self, WalletError> {
        let keys = AccountKeys::from_mnemonic(phrase, passphrase, config)?;
        Ok(Self::new(keys, config))
    }

    pub fn from_xpub(encoded: &str, config: &WalletConfig) -> Result<Self, WalletError> {
        let keys = AccountKeys::from_xpub(encoded, config)?;
        Ok(Self::new(keys, config))
    }

    pub fn keys(&self) -> &AccountKeys {
        &self.keys
    }

    pub fn gap_limit(&self) -> u32 {
        self.gap_limit
    }

    /// First index on `chain` not yet observed as used.
    pub fn next_free_index(&self, chain: Chain) -> u32 {
        self.next_free.get(&chain).copied().unwrap_or(0)
    }

    /// Restore a previously persisted frontier.
    pub fn set_next_free_index(&mut self, chain: Chain, index: u32) {
        self.next_free.insert(chain, index);
    }

    /// Derive (or fetch from cache) the address at `chain/index`.
    pub fn derive(&mut self, chain: Chain, index: u32) -> Result<DerivedAddress, WalletError> {
        if let Some(found) = self.derived.get(&(chain, index)) {
            return Ok(found.clone());
        }
        let address = self.keys.address(chain, index)?;
        let script_pubkey = address.script_pubkey();
        let derived = DerivedAddress {
            chain,
            index,
            address: address.to_string(),
            scripthash: ScriptHash::from_script(&script_pubkey),
            script_pubkey,
        };
        self.paths.insert(derived.address.clone(), (chain, index));
        self.derived.insert((chain, index), derived.clone());
        Ok(derived)
    }

    pub fn address_at(&mut self, chain: Chain, index: u32) -> Result<String, WalletError> {
        Ok(self.derive(chain, index)?.address)
    }

    /// Derivation path of a wallet address, if it has been derived.
    pub fn path_for_address(&self, address: &str) -> Option<(Chain, u32)> {
        self.paths.get(address).copied()
    }

    /// Every address from index 0 up to `frontier + gap_limit` on both
    /// chains.
    pub fn scan_window(&mut self) -> Result<Vec<DerivedAddress>, WalletError> {
        let mut window = Vec::new();
        for chain in Chain::ALL {
            let end = self.next_free_index(chain).saturating_add(self.gap_limit);
            for index in 0..end {
                window.push(self.derive(chain, index)?);
            }
        }
        Ok(window)
    }

    /// Next unused receive address.
    pub async fn next_receive_address(
        &mut self,
        index: &dyn ChainIndex,
    ) -> Result<String, WalletError> {
        self.discover_free(index, Chain::External).await
    }

    /// Next unused change address.
    pub async fn next_change_address(
        &mut self,
        index: &dyn ChainIndex,
    ) -> Result<String, WalletError> {
        self.discover_free(index, Chain::Internal).await
    }

    /// Change address at the current internal frontier, without querying
    /// the server.
    pub fn current_change_address(&mut self) -> Result<String, WalletError> {
        let frontier = self.next_free_index(Chain::Internal);
        self.address_at(Chain::Internal, frontier)
    }

    /// Scan addresses past the frontier until one has no history.
    ///
    /// If every scanned address is used, the frontier still moves forward by
    /// the gap limit and the last scanned address is returned, even though
    /// it has been used before.
    pub async fn discover_free(
        &mut self,
        index: &dyn ChainIndex,
        chain: Chain,
    ) -> Result<String, WalletError> {
        let frontier = self.next_free_index(chain);
        let mut last = None;
        for offset in 0..=self.gap_limit {
            let candidate = self.derive(chain, frontier.saturating_add(offset))?;
            let history = index.get_history(&candidate.scripthash).await?;
            if history.is_empty() {
                if offset > 0 {
                    debug!(?chain, from = frontier, to = candidate.index, "frontier advanced");
                }
                self.next_free.insert(chain, candidate.index);
                return Ok(candidate.address);
            }
            last = Some(candidate);
        }

        let advanced = frontier.saturating_add(self.gap_limit);
        info!(
            ?chain,
            from = frontier,
            to = advanced,
            gap_limit = self.gap_limit,
            "gap limit exhausted, reusing last scanned address"
        );
        self.next_free.insert(chain, advanced);
        match last {
            Some(derived) => Ok(derived.address),
            None => self.address_at(chain, advanced),
        }
    }

    /// Move both frontiers past the last used address, scanning one
    /// gap-limit-sized chunk at a time until a chunk has no history at all.
    pub async fn rescan(&mut self, index: &dyn ChainIndex) -> Result<(), WalletError> {
        for chain in Chain::ALL {
            let mut start = self.next_free_index(chain);
            let mut last_used: Option<u32> = None;
            loop {
                let mut chunk = Vec::with_capacity(self.gap_limit as usize);
                for i in start..start.saturating_add(self.gap_limit) {
                    chunk.push(self.derive(chain, i)?);
                }
                let hashes: Vec<ScriptHash> = chunk.iter().map(|d| d.scripthash).collect();
                let histories = index.multi_get_history(&hashes).await?;

                let used = chunk
                    .iter()
                    .filter(|d| histories.get(&d.scripthash).is_some_and(|h| !h.is_empty()))
                    .map(|d| d.index)
                    .max();
                match used {
                    Some(i) => last_used = Some(i),
                    None => break,
                }
                start = start.saturating_add(self.gap_limit);
            }

            if let Some(i) = last_used {
                let next = i.saturating_add(1);
                if next > self.next_free_index(chain) {
                    info!(?chain, next_free = next, "rescan moved frontier");
                    self.next_free.insert(chain, next);
                }
            }
        }
        Ok(())
    }

    /// Fetch balances for the scan window on both chains and cache them per
    /// address. A funded address past a frontier moves that frontier.
    pub async fn fetch_balance(&mut self, index: &dyn ChainIndex) -> Result<Balance, WalletError> {
        let window = self.scan_window()?;
        let hashes: Vec<ScriptHash> = window.iter().map(|d| d.scripthash).collect();
        let balances = index.multi_get_balance(&hashes).await?;

        self.balances.clear();
        let mut total = Balance::default();
        for derived in &window {
            let Some(balance) = balances.get(&derived.scripthash) else {
                continue;
            };
            if balance.is_empty() {
                continue;
            }
            total += *balance;
            self.balances.insert(derived.address.clone(), *balance);
            if derived.index >= self.next_free_index(derived.chain) {
                self.next_free.insert(derived.chain, derived.index.saturating_add(1));
            }
        }
        debug!(
            confirmed = total.confirmed,
            unconfirmed = total.unconfirmed,
            funded = self.balances.len(),
            "balance fetched"
        );
        Ok(total)
    }

    /// Cached per-address balances from the last [`fetch_balance`](Self::fetch_balance).
    pub fn balances(&self) -> &HashMap<String, Balance> {
        &self.balances
    }

    pub fn balance(&self) -> Balance {
        let mut total = Balance::default();
        for b in self.balances.values() {
            total += *b;
        }
        total
    }

    /// List unspent outputs of every funded address, ordered by outpoint.
    pub async fn fetch_utxos(&mut self, index: &dyn ChainIndex) -> Result<Vec<Utxo>, WalletError> {
        if self.balances.is_empty() {
            self.fetch_balance(index).await?;
        }

        let mut funded = Vec::new();
        for address in self.balances.keys() {
            if let Some(&(chain, i)) = self.paths.get(address) {
                funded.push((chain, i));
            }
        }
        funded.sort();
        let mut targets = Vec::with_capacity(funded.len());
        for (chain, i) in funded {
            targets.push(self.derive(chain, i)?);
        }

        let hashes: Vec<ScriptHash> = targets.iter().map(|d| d.scripthash).collect();
        let unspent = index.multi_list_unspent(&hashes).await?;

        let mut utxos = Vec::new();
        for derived in &targets {
            for entry in unspent.get(&derived.scripthash).into_iter().flatten() {
                utxos.push(Utxo {
                    txid: entry.tx_hash,
                    vout: entry.tx_pos,
                    value: entry.value,
                    address: derived.address.clone(),
                    height: entry.height.max(0),
                });
            }
        }
        utxos.sort_by(|a, b| (a.txid, a.vout).cmp(&(b.txid, b.vout)));
        debug!(count = utxos.len(), "utxos fetched");
        self.utxos = utxos.clone();
        Ok(utxos)
    }

    /// Cached UTXOs from the last [`fetch_utxos`](Self::fetch_utxos).
    pub fn utxos(&self) -> &[Utxo] {
        &self.utxos
    }

    /// Replace the UTXO cache, e.g. from persisted state.
    pub fn set_utxos(&mut self, mut utxos: Vec<Utxo>) {
        utxos.sort_by(|a, b| (a.txid, a.vout).cmp(&(b.txid, b.vout)));
        self.utxos = utxos;
    }

    /// Private key controlling `address`.
    ///
    /// Lookup order: memo, then the derived-address map, then re-derivation
    /// of the whole scan window on both chains.
    pub fn private_key_for_address(&mut self, address: &str) -> Result<PrivateKey, WalletError> {
        if self.keys.is_watch_only() {
            return Err(WalletError::WatchOnly);
        }
        if let Some(key) = self.key_memo.get(address) {
            return Ok(*key);
        }

        let known = self.paths.get(address).copied();
        let path = match known {
            Some(path) => Some(path),
            None => self
                .scan_window()?
                .into_iter()
                .find(|d| d.address == address)
                .map(|d| (d.chain, d.index)),
        };
        let (chain, index) = path.ok_or_else(|| WalletError::KeyNotFound(address.to_owned()))?;

        let key = self.keys.private_key(chain, index)?;
        self.key_memo.insert(address.to_owned(), key);
        Ok(key)
    }

    /// Private key controlling an output script, for chains whose address
    /// encoding differs from bitcoin's but whose scripts are the same.
    pub fn private_key_for_script(&mut self, script: &Script) -> Result<PrivateKey, WalletError> {
        let cached = self
            .derived
            .values()
            .find(|d| d.script_pubkey.as_script() == script)
            .map(|d| d.address.clone());
        let address = match cached {
            Some(address) => address,
            None => self
                .scan_window()?
                .into_iter()
                .find(|d| d.script_pubkey.as_script() == script)
                .map(|d| d.address)
                .ok_or_else(|| WalletError::KeyNotFound(format!("script {}", script.to_hex_string())))?,
        };
        self.private_key_for_address(&address)
    }

    /// WIF encoding of [`private_key_for_address`](Self::private_key_for_address).
    pub fn wif_for_address(&mut self, address: &str) -> Result<String, WalletError> {
        Ok(self.private_key_for_address(address)?.to_wif())
    }
}

impl std::fmt::Debug for HdAddressIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdAddressIndex")
            .field("keys", &self.keys)
            .field("gap_limit", &self.gap_limit)
            .field("next_free_external", &self.next_free_index(Chain::External))
            .field("next_free_internal", &self.next_free_index(Chain::Internal))
            .field("derived", &self.derived.len())
            .finish()
    }
}
