//! Deterministic coin selection.
//!
//! Candidates are ranked by value net of their own spending cost. A
//! "blackjack" pass looks for a set that lands within dust of the target
//! without change; failing that, inputs are accumulated greedily until the
//! targets plus fee are covered. Targets without a value split whatever is
//! left over once every input is spent.
//!
//! Transaction sizes follow the byte model in `brook_core::constants`, with
//! per-script lengths supplied by a [`ScriptSizing`] strategy.

use std::cmp::Ordering;

use bitcoin::ScriptBuf;

use brook_core::constants::{
    TX_EMPTY_SIZE, TX_INPUT_BASE, TX_INPUT_PUBKEYHASH, TX_OUTPUT_BASE, TX_OUTPUT_PUBKEYHASH,
};
use brook_core::types::Utxo;

use crate::error::WalletError;
use crate::sizing::{LegacySizing, ScriptSizing};

/// Size of the change output assumed when deciding whether one is worth adding.
const BLANK_OUTPUT_BYTES: u64 = TX_OUTPUT_BASE + TX_OUTPUT_PUBKEYHASH;

/// Where an output pays to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Address(String),
    /// Raw output script, e.g. an OP_RETURN.
    Script(ScriptBuf),
    /// Change back to the wallet; the address is filled in by the builder.
    Change,
}

/// A requested output. `value: None` asks for an even share of the
/// remainder after every input is spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub destination: Destination,
    pub value: Option<u64>,
}

impl OutputTarget {
    pub fn pay(address: impl Into<String>, value: u64) -> Self {
        Self {
            destination: Destination::Address(address.into()),
            value: Some(value),
        }
    }

    pub fn script(script: ScriptBuf, value: u64) -> Self {
        Self {
            destination: Destination::Script(script),
            value: Some(value),
        }
    }

    /// Send everything (net of fee) to `address`.
    pub fn sweep(address: impl Into<String>) -> Self {
        Self {
            destination: Destination::Address(address.into()),
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedOutput {
    pub destination: Destination,
    pub value: u64,
}

impl SelectedOutput {
    pub fn is_change(&self) -> bool {
        self.destination == Destination::Change
    }
}

/// Result of coin selection.
///
/// `input_value() == output_value() + fee` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<SelectedOutput>,
    pub fee: u64,
}

impl CoinSelection {
    pub fn input_value(&self) -> u64 {
        self.inputs.iter().map(|u| u.value).sum()
    }

    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    pub fn change(&self) -> Option<&SelectedOutput> {
        self.outputs.iter().find(|o| o.is_change())
    }
}

/// Coin selector parameterised by a script-size strategy.
#[derive(Debug, Clone, Default)]
pub struct CoinSelector<S = LegacySizing> {
    sizing: S,
}

impl<S: ScriptSizing> CoinSelector<S> {
    pub fn new(sizing: S) -> Self {
        Self { sizing }
    }

    pub fn sizing(&self) -> &S {
        &self.sizing
    }

    /// Select inputs and resolve outputs.
    ///
    /// # Arguments
    /// - `utxos`: spendable candidates; order does not affect the result
    /// - `targets`: requested outputs; any target without a value switches
    ///   to split mode, which spends every candidate
    /// - `fee_rate`: sat/vB
    pub fn select(
        &self,
        utxos: &[Utxo],
        targets: &[OutputTarget],
        fee_rate: u64,
    ) -> Result<CoinSelection, WalletError> {
        if utxos.is_empty() {
            return Err(WalletError::NoUtxos);
        }
        if targets.is_empty() {
            return Err(WalletError::InvalidAmount("no outputs requested".into()));
        }

        let ranked = self.rank(utxos, fee_rate);

        if targets.iter().any(|t| t.value.is_none()) {
            return self.split(&ranked, targets, fee_rate);
        }

        let outputs: Vec<SelectedOutput> = targets
            .iter()
            .map(|t| SelectedOutput {
                destination: t.destination.clone(),
                value: t.value.unwrap_or_default(),
            })
            .collect();

        self.blackjack(&ranked, &outputs, fee_rate)
            .or_else(|_| self.accumulative(&ranked, &outputs, fee_rate))
    }

    /// Bytes one wallet input adds to a transaction.
    pub fn input_bytes(&self) -> u64 {
        TX_INPUT_BASE + self.sizing.input_script_len()
    }

    pub fn output_bytes(&self, destination: &Destination) -> u64 {
        TX_OUTPUT_BASE + self.sizing.output_script_len(destination)
    }

    /// Smallest output worth creating at `fee_rate`: the cost of spending a
    /// legacy input later.
    pub fn dust_threshold(fee_rate: u64) -> u64 {
        (TX_INPUT_BASE + TX_INPUT_PUBKEYHASH).saturating_mul(fee_rate)
    }

    fn transaction_bytes<'a>(
        &self,
        inputs: usize,
        outputs: impl Iterator<Item = &'a Destination>,
    ) -> u64 {
        let outputs: u64 = outputs.map(|d| self.output_bytes(d)).sum();
        TX_EMPTY_SIZE + self.input_bytes() * inputs as u64 + outputs
    }

    /// Highest net value first, ties by outpoint.
    fn rank(&self, utxos: &[Utxo], fee_rate: u64) -> Vec<Utxo> {
        let cost = i128::from(fee_rate) * i128::from(self.input_bytes());
        let mut ranked = utxos.to_vec();
        ranked.sort_by(|a, b| {
            let score_a = i128::from(a.value) - cost;
            let score_b = i128::from(b.value) - cost;
            match score_b.cmp(&score_a) {
                Ordering::Equal => (a.txid, a.vout).cmp(&(b.txid, b.vout)),
                other => other,
            }
        });
        ranked
    }

    /// Take inputs only while they keep the total within dust of the target.
    fn blackjack(
        &self,
        utxos: &[Utxo],
        outputs: &[SelectedOutput],
        fee_rate: u64,
    ) -> Result<CoinSelection, WalletError> {
        let mut bytes = self.transaction_bytes(0, outputs.iter().map(|o| &o.destination));
        let out_accum: u64 = outputs.iter().map(|o| o.value).sum();
        let input_bytes = self.input_bytes();
        let threshold = Self::dust_threshold(fee_rate);

        let mut in_accum = 0u64;
        let mut inputs = Vec::new();
        for utxo in utxos {
            let fee = fee_rate.saturating_mul(bytes + input_bytes);
            if in_accum.saturating_add(utxo.value) > out_accum + fee + threshold {
                continue;
            }
            bytes += input_bytes;
            in_accum += utxo.value;
            inputs.push(utxo.clone());

            if in_accum < out_accum + fee {
                continue;
            }
            return self.finalize(inputs, outputs.to_vec(), fee_rate);
        }

        Err(WalletError::CoinSelection {
            target: out_accum + fee_rate.saturating_mul(bytes),
            selected: in_accum,
        })
    }

    /// Take inputs in rank order until the targets plus fee are covered.
    /// Inputs that cost more to spend than they carry are skipped.
    fn accumulative(
        &self,
        utxos: &[Utxo],
        outputs: &[SelectedOutput],
        fee_rate: u64,
    ) -> Result<CoinSelection, WalletError> {
        let mut bytes = self.transaction_bytes(0, outputs.iter().map(|o| &o.destination));
        let out_accum: u64 = outputs.iter().map(|o| o.value).sum();
        let input_bytes = self.input_bytes();
        let input_fee = fee_rate.saturating_mul(input_bytes);

        let mut in_accum = 0u64;
        let mut inputs = Vec::new();
        for utxo in utxos {
            if input_fee > utxo.value {
                continue;
            }
            bytes += input_bytes;
            in_accum += utxo.value;
            inputs.push(utxo.clone());

            let fee = fee_rate.saturating_mul(bytes);
            if in_accum < out_accum + fee {
                continue;
            }
            return self.finalize(inputs, outputs.to_vec(), fee_rate);
        }

        Err(WalletError::CoinSelection {
            target: out_accum + fee_rate.saturating_mul(bytes),
            selected: in_accum,
        })
    }

    /// Spend every candidate; valueless targets share the remainder.
    fn split(
        &self,
        utxos: &[Utxo],
        targets: &[OutputTarget],
        fee_rate: u64,
    ) -> Result<CoinSelection, WalletError> {
        let bytes = self.transaction_bytes(utxos.len(), targets.iter().map(|t| &t.destination));
        let fee = fee_rate.saturating_mul(bytes);
        let in_accum: u64 = utxos.iter().map(|u| u.value).sum();
        let out_accum: u64 = targets.iter().filter_map(|t| t.value).sum();

        let remaining = in_accum
            .checked_sub(out_accum + fee)
            .ok_or(WalletError::CoinSelection {
                target: out_accum + fee,
                selected: in_accum,
            })?;

        let unspecified = targets.iter().filter(|t| t.value.is_none()).count() as u64;
        let split_value = remaining / unspecified.max(1);
        let threshold = Self::dust_threshold(fee_rate);
        if unspecified > 0 && split_value <= threshold {
            return Err(WalletError::CoinSelection {
                target: out_accum + fee + (threshold + 1) * unspecified,
                selected: in_accum,
            });
        }

        let outputs = targets
            .iter()
            .map(|t| SelectedOutput {
                destination: t.destination.clone(),
                value: t.value.unwrap_or(split_value),
            })
            .collect();
        self.finalize(utxos.to_vec(), outputs, fee_rate)
    }

    /// Add change if the leftover after paying for it is above dust, then
    /// settle the fee as whatever inputs exceed outputs.
    fn finalize(
        &self,
        inputs: Vec<Utxo>,
        mut outputs: Vec<SelectedOutput>,
        fee_rate: u64,
    ) -> Result<CoinSelection, WalletError> {
        let bytes = self.transaction_bytes(inputs.len(), outputs.iter().map(|o| &o.destination));
        let fee_after_extra_output = fee_rate.saturating_mul(bytes + BLANK_OUTPUT_BYTES);
        let in_value: u64 = inputs.iter().map(|u| u.value).sum();
        let out_value: u64 = outputs.iter().map(|o| o.value).sum();

        if let Some(remainder) = in_value.checked_sub(out_value + fee_after_extra_output) {
            if remainder > Self::dust_threshold(fee_rate) {
                outputs.push(SelectedOutput {
                    destination: Destination::Change,
                    value: remainder,
                });
            }
        }

        let out_value: u64 = outputs.iter().map(|o| o.value).sum();
        let fee = in_value
            .checked_sub(out_value)
            .ok_or(WalletError::CoinSelection {
                target: out_value + fee_rate.saturating_mul(bytes),
                selected: in_value,
            })?;

        Ok(CoinSelection {
            inputs,
            outputs,
            fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Txid;
    use bitcoin::hashes::Hash;
    use brook_core::types::AddressType;

    const DEST: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";

    fn utxo(n: u8, value: u64) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([n; 32]),
            vout: 0,
            value,
            address: DEST.into(),
            height: 100,
        }
    }

    fn native() -> CoinSelector<AddressType> {
        CoinSelector::new(AddressType::NativeSegwit)
    }

    #[test]
    fn accumulative_with_change() {
        // 10 + 68 + 34 = 112 bytes, 146 once change is added.
        let sel = native()
            .select(&[utxo(1, 100_000)], &[OutputTarget::pay(DEST, 50_000)], 1)
            .unwrap();
        assert_eq!(sel.inputs.len(), 1);
        assert_eq!(sel.outputs.len(), 2);
        assert_eq!(sel.fee, 146);
        assert_eq!(sel.change().unwrap().value, 100_000 - 50_000 - 146);
        assert_eq!(sel.input_value(), sel.output_value() + sel.fee);
    }

    #[test]
    fn blackjack_avoids_change() {
        let sel = native()
            .select(
                &[utxo(1, 100_000), utxo(2, 50_200)],
                &[OutputTarget::pay(DEST, 50_000)],
                1,
            )
            .unwrap();
        assert_eq!(sel.inputs, vec![utxo(2, 50_200)]);
        assert!(sel.change().is_none());
        assert_eq!(sel.fee, 200);
    }

    #[test]
    fn insufficient_funds_reports_target_and_selected() {
        let err = native()
            .select(&[utxo(1, 10_000)], &[OutputTarget::pay(DEST, 20_000)], 1)
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::CoinSelection {
                target: 20_112,
                selected: 10_000
            }
        );
    }

    #[test]
    fn uneconomic_inputs_are_skipped() {
        // Spending a 68-byte input at 200 sat/vB costs 13,600.
        let sel = native()
            .select(
                &[utxo(1, 10_000), utxo(2, 1_000_000)],
                &[OutputTarget::pay(DEST, 500_000)],
                200,
            )
            .unwrap();
        assert_eq!(sel.inputs, vec![utxo(2, 1_000_000)]);
        assert_eq!(sel.fee, 29_200);

        let err = native()
            .select(&[utxo(1, 10_000)], &[OutputTarget::pay(DEST, 1_000)], 200)
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::CoinSelection {
                target: 9_800,
                selected: 0
            }
        );
    }

    #[test]
    fn sweep_spends_everything() {
        let sel = native()
            .select(
                &[utxo(1, 30_000), utxo(2, 20_000)],
                &[OutputTarget::sweep(DEST)],
                1,
            )
            .unwrap();
        assert_eq!(sel.inputs.len(), 2);
        assert_eq!(sel.outputs.len(), 1);
        assert_eq!(sel.fee, 180);
        assert_eq!(sel.outputs[0].value, 49_820);
    }

    #[test]
    fn split_with_fixed_and_sweep() {
        let sel = native()
            .select(
                &[utxo(1, 30_000), utxo(2, 20_000)],
                &[OutputTarget::pay(DEST, 10_000), OutputTarget::sweep(DEST)],
                1,
            )
            .unwrap();
        assert_eq!(sel.outputs[0].value, 10_000);
        assert_eq!(sel.outputs[1].value, 39_786);
        assert_eq!(sel.fee, 214);
    }

    #[test]
    fn split_below_dust_fails() {
        let err = native()
            .select(&[utxo(1, 250)], &[OutputTarget::sweep(DEST)], 1)
            .unwrap_err();
        assert!(matches!(err, WalletError::CoinSelection { selected: 250, .. }));
    }

    #[test]
    fn legacy_sizes_by_default() {
        let sel = CoinSelector::<LegacySizing>::default()
            .select(&[utxo(1, 100_000)], &[OutputTarget::pay(DEST, 50_000)], 10)
            .unwrap();
        assert_eq!(sel.fee, 2_260);
        assert_eq!(sel.change().unwrap().value, 47_740);
    }

    #[test]
    fn input_order_does_not_matter() {
        let a = [utxo(1, 40_000), utxo(2, 40_000), utxo(3, 70_000), utxo(4, 5_000)];
        let mut b = a.clone();
        b.reverse();
        let targets = [OutputTarget::pay(DEST, 90_000)];
        assert_eq!(
            native().select(&a, &targets, 3).unwrap(),
            native().select(&b, &targets, 3).unwrap()
        );
    }

    #[test]
    fn zero_fee_rate_exact_match_has_no_change() {
        let sel = native()
            .select(&[utxo(1, 10_000), utxo(2, 5_000)], &[OutputTarget::pay(DEST, 15_000)], 0)
            .unwrap();
        assert_eq!(sel.fee, 0);
        assert_eq!(sel.inputs.len(), 2);
        assert!(sel.change().is_none());
    }

    #[test]
    fn empty_inputs_rejected() {
        assert_eq!(
            native().select(&[], &[OutputTarget::pay(DEST, 1)], 1),
            Err(WalletError::NoUtxos)
        );
        assert!(matches!(
            native().select(&[utxo(1, 1)], &[], 1),
            Err(WalletError::InvalidAmount(_))
        ));
    }
}
