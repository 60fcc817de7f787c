//! Trait interfaces between Brook crates.
//!
//! - [`ChainIndex`]: the indexing-server vocabulary the wallet layers
//!   consume (brook-electrum implements it; tests mock it)

use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::Txid;

use crate::error::ChainError;
use crate::types::{Balance, HistoryEntry, ScriptHash, UnspentEntry};

/// Read access to an address-indexing server, keyed by scripthash.
///
/// The `multi_*` methods may be served by batched requests or by parallel
/// single requests depending on server capabilities; callers cannot tell
/// the difference. Scripthashes the server returned no data for are simply
/// absent from the resulting map.
#[async_trait]
pub trait ChainIndex: Send + Sync {
    /// Transaction history for one scripthash.
    async fn get_history(&self, scripthash: &ScriptHash) -> Result<Vec<HistoryEntry>, ChainError>;

    /// Transaction histories for many scripthashes.
    async fn multi_get_history(
        &self,
        scripthashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, Vec<HistoryEntry>>, ChainError>;

    /// Balances for many scripthashes.
    async fn multi_get_balance(
        &self,
        scripthashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, Balance>, ChainError>;

    /// Unspent outputs for many scripthashes.
    async fn multi_list_unspent(
        &self,
        scripthashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, Vec<UnspentEntry>>, ChainError>;

    /// Raw serialized transaction bytes.
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, ChainError>;

    /// Broadcast a raw signed transaction. Returns the txid reported by the
    /// server.
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, ChainError>;
}
