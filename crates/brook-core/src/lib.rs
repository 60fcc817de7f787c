//! # brook-core: shared types and trait seams for Brook.
//!
//! Everything the chain-synchronization and transaction-construction
//! layers have in common lives here:
//!
//! - [`error`]: `RpcError` and `ChainError`
//! - [`types`]: peers, scripthashes, asset ids, history/balance/unspent
//!   records, UTXOs
//! - [`constants`]: protocol timeouts, fee heuristics, sizing constants
//! - [`traits`]: the [`traits::ChainIndex`] seam between the wallet
//!   layers and the indexing-server client

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ChainError, RpcError};
pub use traits::ChainIndex;
pub use types::{
    AddressType, AssetId, Balance, Chain, HistoryEntry, Peer, ScriptHash, UnspentEntry, Utxo,
};
