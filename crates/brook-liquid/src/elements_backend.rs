//! [`ProofBackend`] over the `elements` crate.
//!
//! Transactions use Elements consensus encoding. Blinding maps the
//! [`Pset`] onto an `elements::pset::PartiallySignedTransaction`, runs the
//! secp256k1-zkp blinder and copies the commitments and proofs back.
//! Commitments are stored in their 33-byte consensus form.
//!
//! The spent outputs are rebuilt from the opened secrets of each input:
//! the commitments of an output are a function of its value, asset and
//! blinding factors, which is all the surjection proofs and the segwit v0
//! sighash need.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{OutPoint, Script, ScriptBuf, Txid};
use elements::confidential::{self, AssetBlindingFactor, ValueBlindingFactor};
use elements::encode::{deserialize, serialize};
use elements::pset::{Input, Output, PartiallySignedTransaction};
use elements::secp256k1_zkp::{self, RangeProof, SurjectionProof};
use elements::sighash::SighashCache;
use elements::{
    EcdsaSighashType, Transaction, TxIn, TxInWitness, TxOut, TxOutSecrets, TxOutWitness,
};
use tracing::{debug, trace};

use brook_core::types::AssetId;

use crate::backend::{
    AssetField, BlindedOutput, DecodedTransaction, ExtractedTransaction, ProofBackend,
    TxOutputData, UnblindingData, ValueField,
};
use crate::error::LiquidError;
use crate::pset::{Pset, PsetInput, PsetOutput};

pub struct ElementsBackend {
    secp: secp256k1_zkp::Secp256k1<secp256k1_zkp::All>,
}

impl Default for ElementsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementsBackend {
    pub fn new() -> Self {
        Self {
            secp: secp256k1_zkp::Secp256k1::new(),
        }
    }

    /// The output `input` spends, with commitments recomputed from its
    /// opened secrets.
    fn spent_output(&self, input: &PsetInput) -> Result<TxOut, LiquidError> {
        let secrets = &input.secrets;
        let asset_id = to_elements_asset(&secrets.asset)?;
        let (asset, value) = if secrets.is_explicit() {
            (
                confidential::Asset::Explicit(asset_id),
                confidential::Value::Explicit(secrets.value),
            )
        } else {
            let opened = to_secrets(secrets)?;
            let asset = confidential::Asset::new_confidential(&self.secp, asset_id, opened.asset_bf);
            let generator = asset
                .commitment()
                .ok_or_else(|| LiquidError::Backend("asset commitment missing".into()))?;
            let value =
                confidential::Value::new_confidential(&self.secp, opened.value, generator, opened.value_bf);
            (asset, value)
        };
        Ok(TxOut {
            asset,
            value,
            nonce: confidential::Nonce::Null,
            script_pubkey: to_elements_script(&input.script_pubkey),
            witness: TxOutWitness::default(),
        })
    }

    /// Elements transaction for the current state of `pset`.
    fn transaction(&self, pset: &Pset) -> Result<Transaction, LiquidError> {
        let input = pset
            .inputs()
            .iter()
            .map(|i| TxIn {
                previous_output: to_elements_outpoint(&i.outpoint),
                script_sig: to_elements_script(&i.script_sig),
                sequence: elements::Sequence::from_consensus(i.sequence.to_consensus_u32()),
                witness: TxInWitness {
                    script_witness: i.witness.clone(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect();
        let output = pset
            .outputs()
            .iter()
            .map(pset_txout)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Transaction {
            version: 2,
            lock_time: elements::LockTime::from_consensus(pset.lock_time()),
            input,
            output,
        })
    }

    fn blind_with(&self, pset: &mut Pset, last: bool) -> Result<(), LiquidError> {
        let mut secrets = HashMap::with_capacity(pset.inputs().len());
        let mut blinder = PartiallySignedTransaction::new_v2();
        for (i, input) in pset.inputs().iter().enumerate() {
            let mut pset_input = Input::from_prevout(to_elements_outpoint(&input.outpoint));
            pset_input.witness_utxo = Some(self.spent_output(input)?);
            blinder.add_input(pset_input);
            secrets.insert(i, to_secrets(&input.secrets)?);
        }
        for (i, output) in pset.outputs().iter().enumerate() {
            if output.blinded.is_some() {
                return Err(LiquidError::Blinding(format!("output {i} is already blinded")));
            }
            let mut pset_output = Output::new_explicit(
                to_elements_script(&output.script_pubkey),
                output.value,
                to_elements_asset(&output.asset)?,
                output.blinding_key.map(bitcoin::PublicKey::new),
            );
            pset_output.blinder_index = output.blinder_index;
            blinder.add_output(pset_output);
        }

        let mut rng = rand::thread_rng();
        if last {
            blinder
                .blind_last(&mut rng, &self.secp, &secrets)
                .map_err(|e| LiquidError::Blinding(e.to_string()))?;
        } else {
            blinder
                .blind_non_last(&mut rng, &self.secp, &secrets)
                .map_err(|e| LiquidError::Blinding(e.to_string()))?;
        }

        let blinded = blinder
            .extract_tx()
            .map_err(|e| LiquidError::Blinding(format!("cannot read blinded outputs: {e}")))?;
        let mut count = 0;
        for (i, txout) in blinded.output.iter().enumerate() {
            let output = pset.output_mut(i)?;
            if output.needs_blinding() && matches!(txout.asset, confidential::Asset::Confidential(_)) {
                output.blinded = Some(blinded_output(txout));
                count += 1;
            }
        }
        debug!(last, blinded = count, "outputs blinded");
        Ok(())
    }
}

impl std::fmt::Debug for ElementsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementsBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl ProofBackend for ElementsBackend {
    async fn decode_transaction(&self, raw: &[u8]) -> Result<DecodedTransaction, LiquidError> {
        let tx: Transaction = deserialize(raw)
            .map_err(|e| LiquidError::Backend(format!("undecodable transaction: {e}")))?;
        let outputs = tx
            .output
            .iter()
            .enumerate()
            .map(|(vout, txout)| output_data(vout as u32, txout))
            .collect::<Result<Vec<_>, _>>()?;
        let txid = Txid::from_byte_array(tx.txid().to_byte_array());
        trace!(%txid, outputs = outputs.len(), "decoded transaction");
        Ok(DecodedTransaction { txid, outputs })
    }

    async fn unblind(
        &self,
        output: &TxOutputData,
        blinding_key: &SecretKey,
    ) -> Result<UnblindingData, LiquidError> {
        let txout = data_txout(output)?;
        let key = secp256k1_zkp::SecretKey::from_slice(&blinding_key.secret_bytes())
            .map_err(|e| LiquidError::Backend(e.to_string()))?;
        let secrets = txout
            .unblind(&self.secp, key)
            .map_err(|e| LiquidError::Backend(format!("cannot unblind output {}: {e}", output.vout)))?;
        from_secrets(&secrets)
    }

    async fn blind_last(&self, pset: &mut Pset) -> Result<(), LiquidError> {
        self.blind_with(pset, true)
    }

    async fn blind_non_last(&self, pset: &mut Pset) -> Result<(), LiquidError> {
        self.blind_with(pset, false)
    }

    fn sighash(
        &self,
        pset: &Pset,
        input_index: usize,
        script_code: &Script,
    ) -> Result<[u8; 32], LiquidError> {
        let input = pset
            .inputs()
            .get(input_index)
            .ok_or_else(|| LiquidError::Signing(format!("no input {input_index}")))?;
        let value = self.spent_output(input)?.value;
        let tx = self.transaction(pset)?;
        let sighash = SighashCache::new(&tx).segwitv0_sighash(
            input_index,
            &to_elements_script(script_code),
            value,
            EcdsaSighashType::All,
        );
        Ok(sighash.to_byte_array())
    }

    async fn extract(&self, pset: &Pset) -> Result<ExtractedTransaction, LiquidError> {
        if let Some(i) = pset.inputs().iter().position(|i| !i.is_signed()) {
            return Err(LiquidError::Signing(format!("input {i} is not signed")));
        }
        let tx = self.transaction(pset)?;
        Ok(ExtractedTransaction {
            raw: serialize(&tx),
            txid: Txid::from_byte_array(tx.txid().to_byte_array()),
        })
    }
}

fn to_elements_asset(asset: &AssetId) -> Result<elements::AssetId, LiquidError> {
    elements::AssetId::from_str(&asset.to_string())
        .map_err(|e| LiquidError::Backend(format!("asset {asset}: {e}")))
}

fn from_elements_asset(asset: &elements::AssetId) -> Result<AssetId, LiquidError> {
    AssetId::from_str(&asset.to_string()).map_err(LiquidError::Backend)
}

fn to_elements_outpoint(outpoint: &OutPoint) -> elements::OutPoint {
    elements::OutPoint::new(
        elements::Txid::from_byte_array(outpoint.txid.to_byte_array()),
        outpoint.vout,
    )
}

fn to_elements_script(script: &Script) -> elements::Script {
    elements::Script::from(script.to_bytes())
}

fn to_secrets(data: &UnblindingData) -> Result<TxOutSecrets, LiquidError> {
    let (asset_bf, value_bf) = if data.is_explicit() {
        (AssetBlindingFactor::zero(), ValueBlindingFactor::zero())
    } else {
        (
            AssetBlindingFactor::from_slice(&data.asset_blinding_factor)
                .map_err(|e| LiquidError::Blinding(format!("asset blinding factor: {e}")))?,
            ValueBlindingFactor::from_slice(&data.value_blinding_factor)
                .map_err(|e| LiquidError::Blinding(format!("value blinding factor: {e}")))?,
        )
    };
    Ok(TxOutSecrets {
        asset: to_elements_asset(&data.asset)?,
        asset_bf,
        value: data.value,
        value_bf,
    })
}

fn from_secrets(secrets: &TxOutSecrets) -> Result<UnblindingData, LiquidError> {
    let mut asset_blinding_factor = [0u8; 32];
    asset_blinding_factor.copy_from_slice(secrets.asset_bf.into_inner().as_ref());
    let mut value_blinding_factor = [0u8; 32];
    value_blinding_factor.copy_from_slice(secrets.value_bf.into_inner().as_ref());
    Ok(UnblindingData {
        value: secrets.value,
        asset: from_elements_asset(&secrets.asset)?,
        asset_blinding_factor,
        value_blinding_factor,
    })
}

fn output_data(vout: u32, txout: &TxOut) -> Result<TxOutputData, LiquidError> {
    let asset = match txout.asset {
        confidential::Asset::Explicit(id) => AssetField::Explicit(from_elements_asset(&id)?),
        other => AssetField::Confidential(serialize(&other)),
    };
    let value = match txout.value {
        confidential::Value::Explicit(v) => ValueField::Explicit(v),
        other => ValueField::Confidential(serialize(&other)),
    };
    let nonce = match txout.nonce {
        confidential::Nonce::Null => Vec::new(),
        other => serialize(&other),
    };
    Ok(TxOutputData {
        vout,
        script_pubkey: ScriptBuf::from_bytes(txout.script_pubkey.as_bytes().to_vec()),
        asset,
        value,
        nonce,
        rangeproof: txout
            .witness
            .rangeproof
            .as_ref()
            .map(|p| p.serialize())
            .unwrap_or_default(),
    })
}

fn data_txout(output: &TxOutputData) -> Result<TxOut, LiquidError> {
    let asset = match &output.asset {
        AssetField::Explicit(id) => confidential::Asset::Explicit(to_elements_asset(id)?),
        AssetField::Confidential(bytes) => decode_field(bytes, "asset commitment")?,
    };
    let value = match &output.value {
        ValueField::Explicit(v) => confidential::Value::Explicit(*v),
        ValueField::Confidential(bytes) => decode_field(bytes, "value commitment")?,
    };
    let nonce = if output.nonce.is_empty() {
        confidential::Nonce::Null
    } else {
        decode_field(&output.nonce, "nonce")?
    };
    let rangeproof = if output.rangeproof.is_empty() {
        None
    } else {
        Some(Box::new(RangeProof::from_slice(&output.rangeproof).map_err(
            |e| LiquidError::Backend(format!("bad range proof on output {}: {e}", output.vout)),
        )?))
    };
    Ok(TxOut {
        asset,
        value,
        nonce,
        script_pubkey: to_elements_script(&output.script_pubkey),
        witness: TxOutWitness {
            surjection_proof: None,
            rangeproof,
        },
    })
}

fn pset_txout(output: &PsetOutput) -> Result<TxOut, LiquidError> {
    let script_pubkey = to_elements_script(&output.script_pubkey);
    let Some(blinded) = &output.blinded else {
        return Ok(TxOut {
            asset: confidential::Asset::Explicit(to_elements_asset(&output.asset)?),
            value: confidential::Value::Explicit(output.value),
            nonce: confidential::Nonce::Null,
            script_pubkey,
            witness: TxOutWitness::default(),
        });
    };
    let rangeproof = RangeProof::from_slice(&blinded.rangeproof)
        .map_err(|e| LiquidError::Backend(format!("bad range proof: {e}")))?;
    let surjection_proof = SurjectionProof::from_slice(&blinded.surjection_proof)
        .map_err(|e| LiquidError::Backend(format!("bad surjection proof: {e}")))?;
    Ok(TxOut {
        asset: decode_field(&blinded.asset_commitment, "asset commitment")?,
        value: decode_field(&blinded.value_commitment, "value commitment")?,
        nonce: decode_field(&blinded.nonce, "nonce")?,
        script_pubkey,
        witness: TxOutWitness {
            surjection_proof: Some(Box::new(surjection_proof)),
            rangeproof: Some(Box::new(rangeproof)),
        },
    })
}

fn blinded_output(txout: &TxOut) -> BlindedOutput {
    BlindedOutput {
        asset_commitment: serialize(&txout.asset),
        value_commitment: serialize(&txout.value),
        nonce: serialize(&txout.nonce),
        rangeproof: txout
            .witness
            .rangeproof
            .as_ref()
            .map(|p| p.serialize())
            .unwrap_or_default(),
        surjection_proof: txout
            .witness
            .surjection_proof
            .as_ref()
            .map(|p| p.serialize())
            .unwrap_or_default(),
    }
}

fn decode_field<T: elements::encode::Decodable>(
    bytes: &[u8],
    what: &str,
) -> Result<T, LiquidError> {
    deserialize(bytes).map_err(|e| LiquidError::Backend(format!("bad {what}: {e}")))
}
