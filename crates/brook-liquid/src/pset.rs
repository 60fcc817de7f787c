//! Partially built confidential transaction.
//!
//! A [`Pset`] moves through four stages, strictly forward:
//!
//! ```text
//! Building ──blind──▶ Blinded ──sign──▶ Signed ──finalize──▶ Finalized
//! ```
//!
//! Inputs and outputs can only change while `Building`. Signatures are
//! accepted once blinded, since signing covers the commitments. After
//! `Finalized` every mutating call fails with [`LiquidError::Finalized`].

use bitcoin::secp256k1::PublicKey;
use bitcoin::{OutPoint, ScriptBuf, Sequence};
use tracing::debug;

use brook_core::types::AssetId;

use crate::backend::{BlindedOutput, ExtractedTransaction, ProofBackend, UnblindingData};
use crate::error::LiquidError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PsetStage {
    Building,
    Blinded,
    Signed,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsetInput {
    pub outpoint: OutPoint,
    pub sequence: Sequence,
    /// Script of the spent output; also how the signer finds the key.
    pub script_pubkey: ScriptBuf,
    /// Opened commitments of the spent output.
    pub secrets: UnblindingData,
    pub script_sig: ScriptBuf,
    pub witness: Vec<Vec<u8>>,
}

impl PsetInput {
    pub fn new(outpoint: OutPoint, script_pubkey: ScriptBuf, secrets: UnblindingData) -> Self {
        Self {
            outpoint,
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            script_pubkey,
            secrets,
            script_sig: ScriptBuf::new(),
            witness: Vec::new(),
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.witness.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRole {
    Recipient,
    Change,
    Fee,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsetOutput {
    pub script_pubkey: ScriptBuf,
    pub asset: AssetId,
    pub value: u64,
    /// Receiver's blinding pubkey; `None` leaves the output explicit.
    pub blinding_key: Option<PublicKey>,
    /// Input whose owner is responsible for blinding this output.
    pub blinder_index: Option<u32>,
    pub role: OutputRole,
    pub blinded: Option<BlindedOutput>,
}

impl PsetOutput {
    pub fn recipient(
        script_pubkey: ScriptBuf,
        asset: AssetId,
        value: u64,
        blinding_key: Option<PublicKey>,
    ) -> Self {
        Self {
            script_pubkey,
            asset,
            value,
            blinding_key,
            blinder_index: None,
            role: OutputRole::Recipient,
            blinded: None,
        }
    }

    pub fn change(
        script_pubkey: ScriptBuf,
        asset: AssetId,
        value: u64,
        blinding_key: PublicKey,
    ) -> Self {
        Self {
            role: OutputRole::Change,
            ..Self::recipient(script_pubkey, asset, value, Some(blinding_key))
        }
    }

    /// Explicit fee output (empty script).
    pub fn fee(asset: AssetId, value: u64) -> Self {
        Self {
            role: OutputRole::Fee,
            ..Self::recipient(ScriptBuf::new(), asset, value, None)
        }
    }

    pub fn needs_blinding(&self) -> bool {
        self.blinding_key.is_some() && self.blinded.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pset {
    inputs: Vec<PsetInput>,
    outputs: Vec<PsetOutput>,
    lock_time: u32,
    stage: PsetStage,
}

impl Default for Pset {
    fn default() -> Self {
        Self::new()
    }
}

impl Pset {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            stage: PsetStage::Building,
        }
    }

    pub fn stage(&self) -> PsetStage {
        self.stage
    }

    pub fn inputs(&self) -> &[PsetInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PsetOutput] {
        &self.outputs
    }

    pub fn lock_time(&self) -> u32 {
        self.lock_time
    }

    pub fn set_lock_time(&mut self, lock_time: u32) -> Result<(), LiquidError> {
        self.require(PsetStage::Building, "set the lock time of")?;
        self.lock_time = lock_time;
        Ok(())
    }

    pub fn add_input(&mut self, input: PsetInput) -> Result<(), LiquidError> {
        self.require(PsetStage::Building, "add inputs to")?;
        self.inputs.push(input);
        Ok(())
    }

    /// Append an output; returns its index.
    pub fn add_output(&mut self, output: PsetOutput) -> Result<usize, LiquidError> {
        self.require(PsetStage::Building, "add outputs to")?;
        self.outputs.push(output);
        Ok(self.outputs.len() - 1)
    }

    pub fn remove_output(&mut self, index: usize) -> Result<PsetOutput, LiquidError> {
        self.require(PsetStage::Building, "remove outputs from")?;
        if index >= self.outputs.len() {
            return Err(LiquidError::InvalidTarget(format!("no output {index}")));
        }
        Ok(self.outputs.remove(index))
    }

    /// Mutable access to an output while building. Blinding backends use
    /// this to write commitments.
    pub fn output_mut(&mut self, index: usize) -> Result<&mut PsetOutput, LiquidError> {
        self.require(PsetStage::Building, "modify outputs of")?;
        self.outputs
            .get_mut(index)
            .ok_or_else(|| LiquidError::InvalidTarget(format!("no output {index}")))
    }

    pub fn has_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.inputs.iter().any(|i| &i.outpoint == outpoint)
    }

    /// Sum of fee outputs.
    pub fn fee(&self) -> u64 {
        self.outputs
            .iter()
            .filter(|o| o.role == OutputRole::Fee)
            .map(|o| o.value)
            .sum()
    }

    pub fn needs_blinding(&self) -> bool {
        self.outputs.iter().any(PsetOutput::needs_blinding)
    }

    /// Whether this wallet can finish blinding: every output still needing
    /// blinding names a blinder among the inputs already present.
    pub fn is_last_blinder(&self) -> bool {
        self.outputs
            .iter()
            .filter(|o| o.needs_blinding())
            .all(|o| o.blinder_index.is_some_and(|i| (i as usize) < self.inputs.len()))
    }

    /// Assign every unassigned blinding output to input 0.
    pub fn assign_blinders(&mut self) -> Result<(), LiquidError> {
        self.require(PsetStage::Building, "assign blinders of")?;
        if self.inputs.is_empty() {
            return Ok(());
        }
        for output in self.outputs.iter_mut().filter(|o| o.needs_blinding()) {
            output.blinder_index.get_or_insert(0);
        }
        Ok(())
    }

    /// Blind pending outputs, then move to [`PsetStage::Blinded`].
    ///
    /// The backend works on a copy; on error `self` is left untouched.
    pub async fn blind(&mut self, backend: &dyn ProofBackend) -> Result<(), LiquidError> {
        self.require(PsetStage::Building, "blind")?;
        let mut working = self.clone();
        if working.needs_blinding() {
            let last = working.is_last_blinder();
            debug!(last, outputs = working.outputs.len(), "blinding outputs");
            if last {
                backend.blind_last(&mut working).await?;
            } else {
                backend.blind_non_last(&mut working).await?;
            }
            if last && working.needs_blinding() {
                return Err(LiquidError::Blinding(
                    "backend left outputs unblinded".into(),
                ));
            }
        }
        working.stage = PsetStage::Blinded;
        *self = working;
        Ok(())
    }

    pub fn set_input_signature(
        &mut self,
        index: usize,
        script_sig: ScriptBuf,
        witness: Vec<Vec<u8>>,
    ) -> Result<(), LiquidError> {
        if self.stage != PsetStage::Blinded && self.stage != PsetStage::Signed {
            return self.require(PsetStage::Blinded, "sign");
        }
        let input = self
            .inputs
            .get_mut(index)
            .ok_or_else(|| LiquidError::Signing(format!("no input {index}")))?;
        input.script_sig = script_sig;
        input.witness = witness;
        if self.inputs.iter().all(PsetInput::is_signed) {
            self.stage = PsetStage::Signed;
        }
        Ok(())
    }

    /// Extract the raw transaction. Irreversible.
    pub async fn finalize(
        &mut self,
        backend: &dyn ProofBackend,
    ) -> Result<ExtractedTransaction, LiquidError> {
        self.require(PsetStage::Signed, "finalize")?;
        let extracted = backend.extract(self).await?;
        self.stage = PsetStage::Finalized;
        Ok(extracted)
    }

    fn require(&self, stage: PsetStage, operation: &'static str) -> Result<(), LiquidError> {
        if self.stage == PsetStage::Finalized {
            return Err(LiquidError::Finalized);
        }
        if self.stage != stage {
            return Err(LiquidError::InvalidStage {
                operation,
                stage: self.stage,
            });
        }
        Ok(())
    }
}
