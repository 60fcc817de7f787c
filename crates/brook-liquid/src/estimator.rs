//! Virtual-size estimation and fee computation for confidential
//! transactions.

use brook_core::constants::{FEE_MARGIN_DENOMINATOR, FEE_MARGIN_NUMERATOR};

use crate::pset::{Pset, PsetInput, PsetOutput};

/// Rangeproof length for a 52-bit value proof.
pub const DEFAULT_RANGEPROOF_LEN: u64 = 4174;
/// Inputs a surjection proof draws on at most.
const SURJECTION_MAX_USED: u64 = 3;

const TX_VERSION_LOCKTIME: u64 = 8;
const TX_FLAG: u64 = 1;
const INPUT_OUTPOINT_SEQUENCE: u64 = 40;
const NESTED_SCRIPT_SIG: u64 = 23;
/// Issuance amount + inflation proof + pegin witness, all empty.
const INPUT_EMPTY_WITNESS_FIELDS: u64 = 3;
/// Stack count, DER signature with sighash byte, compressed pubkey.
const P2WPKH_STACK: u64 = 1 + 1 + 72 + 1 + 33;
const COMMITMENT: u64 = 33;
const EXPLICIT_VALUE: u64 = 9;
const EMPTY_FIELD: u64 = 1;

/// Estimates the virtual size of a transaction before it is blinded and
/// signed.
pub trait VsizeEstimator: Send + Sync {
    fn estimate_vsize(&self, pset: &Pset) -> u64;
}

/// Size model for Liquid segwit v0 wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidVsizeEstimator {
    pub rangeproof_len: u64,
}

impl Default for LiquidVsizeEstimator {
    fn default() -> Self {
        Self {
            rangeproof_len: DEFAULT_RANGEPROOF_LEN,
        }
    }
}

impl LiquidVsizeEstimator {
    /// (non-witness bytes, witness bytes) of one input.
    fn input_size(&self, input: &PsetInput) -> (u64, u64) {
        let script_sig = if input.script_pubkey.is_p2sh() {
            NESTED_SCRIPT_SIG
        } else {
            0
        };
        (
            INPUT_OUTPOINT_SEQUENCE + varint_len(script_sig) + script_sig,
            INPUT_EMPTY_WITNESS_FIELDS + P2WPKH_STACK,
        )
    }

    fn output_size(&self, output: &PsetOutput, n_inputs: u64) -> (u64, u64) {
        let script = output.script_pubkey.len() as u64;
        let script = varint_len(script) + script;
        if output.blinding_key.is_some() {
            let surjection = surjection_proof_len(n_inputs);
            (
                3 * COMMITMENT + script,
                varint_len(surjection)
                    + surjection
                    + varint_len(self.rangeproof_len)
                    + self.rangeproof_len,
            )
        } else {
            (COMMITMENT + EXPLICIT_VALUE + EMPTY_FIELD + script, 2 * EMPTY_FIELD)
        }
    }
}

impl VsizeEstimator for LiquidVsizeEstimator {
    fn estimate_vsize(&self, pset: &Pset) -> u64 {
        let n_inputs = pset.inputs().len() as u64;
        let n_outputs = pset.outputs().len() as u64;

        let mut base = TX_VERSION_LOCKTIME + varint_len(n_inputs) + varint_len(n_outputs);
        let mut witness = TX_FLAG;
        for input in pset.inputs() {
            let (b, w) = self.input_size(input);
            base += b;
            witness += w;
        }
        for output in pset.outputs() {
            let (b, w) = self.output_size(output, n_inputs);
            base += b;
            witness += w;
        }

        (base * 4 + witness).div_ceil(4)
    }
}

/// Fee for `vsize` at a relay fee in sat/kvB, with the safety margin.
pub fn fee_for_vsize(vsize: u64, relay_fee: u64) -> u64 {
    let numerator = u128::from(vsize) * u128::from(relay_fee) * u128::from(FEE_MARGIN_NUMERATOR);
    let denominator = 1000 * u128::from(FEE_MARGIN_DENOMINATOR);
    u64::try_from(numerator.div_ceil(denominator)).unwrap_or(u64::MAX)
}

fn surjection_proof_len(n_inputs: u64) -> u64 {
    let used = n_inputs.clamp(1, SURJECTION_MAX_USED);
    2 + n_inputs.div_ceil(8) + 32 * (1 + used)
}

fn varint_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
