//! Seam to the confidential-proof library.
//!
//! Commitments, range proofs, surjection proofs and the confidential
//! serialization all live behind [`ProofBackend`]. The engine only decides
//! *what* to blind and sign; the backend does the cryptography.

use async_trait::async_trait;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{Script, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use brook_core::types::AssetId;

use crate::error::LiquidError;
use crate::pset::Pset;

/// Asset field of a transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetField {
    Explicit(AssetId),
    /// 33-byte generator commitment.
    Confidential(Vec<u8>),
}

/// Value field of a transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueField {
    Explicit(u64),
    /// 33-byte Pedersen commitment.
    Confidential(Vec<u8>),
}

/// One output of a decoded confidential transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutputData {
    pub vout: u32,
    pub script_pubkey: ScriptBuf,
    pub asset: AssetField,
    pub value: ValueField,
    /// ECDH ephemeral key; empty for explicit outputs.
    pub nonce: Vec<u8>,
    pub rangeproof: Vec<u8>,
}

impl TxOutputData {
    pub fn is_confidential(&self) -> bool {
        matches!(self.asset, AssetField::Confidential(_))
            || matches!(self.value, ValueField::Confidential(_))
    }

    /// Fee outputs carry an empty script.
    pub fn is_fee(&self) -> bool {
        self.script_pubkey.is_empty()
    }

    /// Value and asset when both are explicit.
    pub fn explicit(&self) -> Option<UnblindingData> {
        match (&self.asset, &self.value) {
            (AssetField::Explicit(asset), ValueField::Explicit(value)) => {
                Some(UnblindingData::explicit(*value, *asset))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub txid: Txid,
    pub outputs: Vec<TxOutputData>,
}

/// Opened commitments of an output: what the wallet needs to spend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnblindingData {
    pub value: u64,
    pub asset: AssetId,
    pub asset_blinding_factor: [u8; 32],
    pub value_blinding_factor: [u8; 32],
}

impl UnblindingData {
    /// Data for an unblinded output (zero blinding factors).
    pub fn explicit(value: u64, asset: AssetId) -> Self {
        Self {
            value,
            asset,
            asset_blinding_factor: [0; 32],
            value_blinding_factor: [0; 32],
        }
    }

    pub fn is_explicit(&self) -> bool {
        self.asset_blinding_factor == [0; 32] && self.value_blinding_factor == [0; 32]
    }
}

/// Commitments and proofs written into an output by the blinder.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlindedOutput {
    pub asset_commitment: Vec<u8>,
    pub value_commitment: Vec<u8>,
    pub nonce: Vec<u8>,
    pub rangeproof: Vec<u8>,
    pub surjection_proof: Vec<u8>,
}

/// A finalized, broadcastable transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTransaction {
    pub raw: Vec<u8>,
    pub txid: Txid,
}

impl ExtractedTransaction {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

/// Cryptographic primitives of the confidential chain.
///
/// The blinding calls receive the transaction while it is still being built
/// and fill in [`PsetOutput::blinded`](crate::pset::PsetOutput::blinded) for
/// every output that carries a blinding key. [`Pset::blind`] moves the
/// transaction to the next stage once they return.
#[async_trait]
pub trait ProofBackend: Send + Sync {
    /// Parse a serialized confidential transaction.
    async fn decode_transaction(&self, raw: &[u8]) -> Result<DecodedTransaction, LiquidError>;

    /// Open the commitments of `output` with the wallet's blinding key.
    async fn unblind(
        &self,
        output: &TxOutputData,
        blinding_key: &SecretKey,
    ) -> Result<UnblindingData, LiquidError>;

    /// Blind every pending output so that commitments balance.
    async fn blind_last(&self, pset: &mut Pset) -> Result<(), LiquidError>;

    /// Blind pending outputs without balancing; another party finishes.
    async fn blind_non_last(&self, pset: &mut Pset) -> Result<(), LiquidError>;

    /// Segwit v0 signature hash of input `input_index` under SIGHASH_ALL.
    fn sighash(
        &self,
        pset: &Pset,
        input_index: usize,
        script_code: &Script,
    ) -> Result<[u8; 32], LiquidError>;

    /// Serialize a fully signed transaction.
    async fn extract(&self, pset: &Pset) -> Result<ExtractedTransaction, LiquidError>;
}
