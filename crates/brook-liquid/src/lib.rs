//! # brook-liquid: Confidential transactions for the Liquid sidechain.
//!
//! Builds on the HD index and coin selector of `brook-wallet`: keys use
//! coin type 1776, blinding keys follow SLIP-77, and the cryptography of
//! confidential outputs is delegated to a [`ProofBackend`].
//!
//! # Modules
//!
//! - [`error`]: `LiquidError` enum
//! - [`blinding`]: SLIP-77 master and per-script blinding keys
//! - [`backend`]: proof-library seam and confidential output data
//! - [`elements_backend`]: the seam implemented over the `elements` crate
//! - [`pset`]: staged transaction (building → blinded → signed → finalized)
//! - [`estimator`]: virtual-size estimate and relay-fee pricing
//! - [`selection`]: per-asset coin selection
//! - [`wallet`]: unblinding cache, sync, spendable set
//! - [`engine`]: selection, fee loop, blind, sign, finalize
//! - [`registry`]: asset metadata with negative caching

pub mod backend;
pub mod blinding;
pub mod elements_backend;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod pset;
pub mod registry;
pub mod selection;
pub mod wallet;

// Re-exports for convenient access
pub use backend::{
    AssetField, BlindedOutput, DecodedTransaction, ExtractedTransaction, ProofBackend,
    TxOutputData, UnblindingData, ValueField,
};
pub use blinding::MasterBlindingKey;
pub use elements_backend::ElementsBackend;
pub use engine::{ConfidentialTxEngine, CreatedTransaction, EngineConfig};
pub use error::LiquidError;
pub use estimator::{LiquidVsizeEstimator, VsizeEstimator, fee_for_vsize};
pub use pset::{OutputRole, Pset, PsetInput, PsetOutput, PsetStage};
pub use registry::{AssetMetadata, AssetMetadataFetcher, AssetRegistry, HttpAssetFetcher};
pub use selection::{AssetSelection, LiquidTarget};
pub use wallet::{ConfidentialDestination, LiquidUtxo, LiquidWallet, SyncReport};
