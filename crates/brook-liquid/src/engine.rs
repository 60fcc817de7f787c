//! Confidential transaction engine.
//!
//! [`ConfidentialTxEngine::create_transaction`] runs the whole pipeline:
//!
//! 1. per-asset selection for the requested targets
//! 2. the fee loop, paying the fee in the policy asset
//! 3. blinding
//! 4. signing every input with the key behind its script
//! 5. finalization into a raw transaction
//!
//! Each step is also public so a caller can stop after building (e.g. to
//! show the fee) or hand a blinded transaction to another signer.

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::secp256k1::Message;
use bitcoin::{CompressedPublicKey, EcdsaSighashType, OutPoint, ScriptBuf, Txid};
use bitcoin::script::PushBytesBuf;
use tracing::{debug, info};

use brook_core::constants::{LIQUID_DEFAULT_RELAY_FEE, LIQUID_POLICY_ASSET, MAX_FEE_ITERATIONS};
use brook_core::types::AssetId;
use brook_wallet::keys::nested_redeem_script;

use crate::backend::ProofBackend;
use crate::error::LiquidError;
use crate::estimator::{LiquidVsizeEstimator, VsizeEstimator, fee_for_vsize};
use crate::pset::{OutputRole, Pset, PsetInput, PsetOutput};
use crate::selection::{AssetSelection, LiquidTarget, select_asset, select_per_asset};
use crate::wallet::{ConfidentialDestination, LiquidWallet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Asset fees are paid in.
    pub policy_asset: AssetId,
    /// Minimum relay fee, sat/kvB.
    pub relay_fee: u64,
    pub max_fee_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy_asset: LIQUID_POLICY_ASSET,
            relay_fee: LIQUID_DEFAULT_RELAY_FEE,
            max_fee_iterations: MAX_FEE_ITERATIONS,
        }
    }
}

/// A finalized confidential transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTransaction {
    pub hex: String,
    pub txid: Txid,
    pub fee: u64,
    /// Estimated virtual size the fee was priced on.
    pub vsize: u64,
    pub selections: Vec<AssetSelection>,
}

pub struct ConfidentialTxEngine {
    backend: Arc<dyn ProofBackend>,
    estimator: Arc<dyn VsizeEstimator>,
    config: EngineConfig,
}

impl ConfidentialTxEngine {
    pub fn new(backend: Arc<dyn ProofBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            estimator: Arc::new(LiquidVsizeEstimator::default()),
            config,
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn VsizeEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ProofBackend> {
        &self.backend
    }

    /// Fee for `pset` as it stands now.
    pub fn estimate_fee(&self, pset: &Pset) -> (u64, u64) {
        let vsize = self.estimator.estimate_vsize(pset);
        (vsize, fee_for_vsize(vsize, self.config.relay_fee))
    }

    /// Build, blind, sign and finalize a payment to `targets`.
    pub async fn create_transaction(
        &self,
        wallet: &mut LiquidWallet,
        targets: &[LiquidTarget],
    ) -> Result<CreatedTransaction, LiquidError> {
        let (mut pset, selections) = self.build(wallet, targets)?;
        let (vsize, _) = self.estimate_fee(&pset);
        self.blind(&mut pset).await?;
        self.sign(&mut pset, wallet)?;
        let extracted = pset.finalize(self.backend.as_ref()).await?;

        info!(
            txid = %extracted.txid,
            fee = pset.fee(),
            vsize,
            inputs = pset.inputs().len(),
            outputs = pset.outputs().len(),
            "confidential transaction finalized"
        );
        Ok(CreatedTransaction {
            hex: extracted.to_hex(),
            txid: extracted.txid,
            fee: pset.fee(),
            vsize,
            selections,
        })
    }

    /// Select inputs, lay out outputs and settle the fee.
    ///
    /// Outputs are ordered recipients, change per asset, fee.
    pub fn build(
        &self,
        wallet: &mut LiquidWallet,
        targets: &[LiquidTarget],
    ) -> Result<(Pset, Vec<AssetSelection>), LiquidError> {
        if targets.is_empty() {
            return Err(LiquidError::InvalidTarget("no targets".into()));
        }
        let mut selections = select_per_asset(wallet.utxos(), targets)?;
        let change = wallet.change_destination()?;

        let mut pset = Pset::new();
        for selection in &selections {
            for utxo in &selection.utxos {
                pset.add_input(PsetInput::new(
                    utxo.outpoint,
                    utxo.script_pubkey.clone(),
                    utxo.unblinded,
                ))?;
            }
        }
        for target in targets {
            pset.add_output(PsetOutput::recipient(
                target.script_pubkey.clone(),
                target.asset,
                target.amount,
                target.blinding_key,
            ))?;
        }
        for selection in selections.iter().filter(|s| s.asset != self.config.policy_asset) {
            if let Some(value) = selection.change {
                pset.add_output(PsetOutput::change(
                    change.script_pubkey.clone(),
                    selection.asset,
                    value,
                    change.blinding_key,
                ))?;
            }
        }

        if let Some(extra) = self.settle_fee(&mut pset, wallet, &change)? {
            selections.push(extra);
        }
        pset.assign_blinders()?;
        Ok((pset, selections))
    }

    /// Price the transaction and pay for it from the policy asset.
    ///
    /// The policy surplus (policy inputs minus policy recipients) becomes
    /// fee plus change. When it falls short, more policy outputs are
    /// selected and the size is re-estimated. A change too small to survive
    /// its own cost is folded into the fee. Returns the extra selection if
    /// one was needed.
    fn settle_fee(
        &self,
        pset: &mut Pset,
        wallet: &LiquidWallet,
        change: &ConfidentialDestination,
    ) -> Result<Option<AssetSelection>, LiquidError> {
        let policy = self.config.policy_asset;
        let mut surplus = policy_surplus(pset, policy)?;
        let mut extra: Option<AssetSelection> = None;

        for iteration in 1..=self.config.max_fee_iterations {
            remove_fee_and_policy_change(pset, policy)?;
            let change_index = pset.add_output(PsetOutput::change(
                change.script_pubkey.clone(),
                policy,
                0,
                change.blinding_key,
            ))?;
            let fee_index = pset.add_output(PsetOutput::fee(policy, 0))?;
            let (vsize, fee_with_change) = self.estimate_fee(pset);

            debug!(iteration, vsize, fee = fee_with_change, surplus, "pricing transaction");

            if surplus > fee_with_change {
                pset.output_mut(change_index)?.value = surplus - fee_with_change;
                pset.output_mut(fee_index)?.value = fee_with_change;
                return Ok(extra);
            }

            pset.remove_output(change_index)?;
            let fee_index = fee_index - 1;
            let (_, fee_without_change) = self.estimate_fee(pset);
            if surplus >= fee_without_change {
                debug!(fee = surplus, "change folded into fee");
                pset.output_mut(fee_index)?.value = surplus;
                return Ok(extra);
            }

            let needed = fee_with_change - surplus;
            let used: HashSet<OutPoint> = pset.inputs().iter().map(|i| i.outpoint).collect();
            let more = select_asset(wallet.utxos(), policy, needed, &used)?;
            debug!(needed, inputs = more.utxos.len(), "selected more inputs for the fee");
            for utxo in &more.utxos {
                pset.add_input(PsetInput::new(
                    utxo.outpoint,
                    utxo.script_pubkey.clone(),
                    utxo.unblinded,
                ))?;
            }
            surplus += more.selected();
            extra = Some(match extra {
                None => more,
                Some(mut prev) => {
                    prev.target += more.target;
                    prev.utxos.extend(more.utxos);
                    prev.change = more.change;
                    prev
                }
            });
        }

        Err(LiquidError::FeeConvergence {
            iterations: self.config.max_fee_iterations,
        })
    }

    /// Blind with the last-blinder routine when every pending output is
    /// covered by known inputs, the partial one otherwise.
    pub async fn blind(&self, pset: &mut Pset) -> Result<(), LiquidError> {
        pset.blind(self.backend.as_ref()).await
    }

    /// Sign every input with the wallet key behind its script.
    ///
    /// Signatures go into a copy that replaces `pset` only once every
    /// input is signed.
    pub fn sign(&self, pset: &mut Pset, wallet: &mut LiquidWallet) -> Result<(), LiquidError> {
        let mut keys = Vec::with_capacity(pset.inputs().len());
        for input in pset.inputs() {
            keys.push(wallet.private_key_for_script(&input.script_pubkey)?);
        }

        let secp = wallet.secp();
        let mut signed = pset.clone();
        for (i, key) in keys.iter().enumerate() {
            let pk = CompressedPublicKey::from_private_key(secp, key)
                .map_err(|e| LiquidError::Signing(e.to_string()))?;
            let script_code = ScriptBuf::new_p2pkh(&pk.pubkey_hash());
            let sighash = self.backend.sighash(pset, i, &script_code)?;
            let signature = secp.sign_ecdsa(&Message::from_digest(sighash), &key.inner);

            let mut sig = signature.serialize_der().to_vec();
            sig.push(EcdsaSighashType::All.to_u32() as u8);
            let witness = vec![sig, pk.to_bytes().to_vec()];

            let script_sig = if pset.inputs()[i].script_pubkey.is_p2sh() {
                let push = PushBytesBuf::try_from(nested_redeem_script(&pk).to_bytes())
                    .map_err(|e| LiquidError::Signing(e.to_string()))?;
                ScriptBuf::builder().push_slice(push).into_script()
            } else {
                ScriptBuf::new()
            };
            signed.set_input_signature(i, script_sig, witness)?;
        }
        *pset = signed;
        Ok(())
    }
}

impl std::fmt::Debug for ConfidentialTxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidentialTxEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Policy-asset inputs minus policy-asset recipient outputs.
fn policy_surplus(pset: &Pset, policy: AssetId) -> Result<u64, LiquidError> {
    let inputs: u64 = pset
        .inputs()
        .iter()
        .filter(|i| i.secrets.asset == policy)
        .map(|i| i.secrets.value)
        .sum();
    let spent: u64 = pset
        .outputs()
        .iter()
        .filter(|o| o.asset == policy && o.role == OutputRole::Recipient)
        .map(|o| o.value)
        .sum();
    inputs.checked_sub(spent).ok_or(LiquidError::CoinSelection {
        asset: policy,
        target: spent,
        selected: inputs,
    })
}

fn remove_fee_and_policy_change(pset: &mut Pset, policy: AssetId) -> Result<(), LiquidError> {
    while let Some(index) = pset.outputs().iter().position(|o| {
        o.role == OutputRole::Fee || (o.role == OutputRole::Change && o.asset == policy)
    }) {
        pset.remove_output(index)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bitcoin::Script;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, ecdsa::Signature};
    use brook_core::types::{AddressType, Chain};
    use parking_lot::Mutex;

    use crate::backend::{
        BlindedOutput, DecodedTransaction, ExtractedTransaction, TxOutputData, UnblindingData,
    };
    use crate::pset::PsetStage;
    use crate::wallet::LiquidUtxo;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    /// Marks outputs blinded, hashes the input index for sighashes and
    /// records which blinding routine ran.
    #[derive(Default)]
    struct FakeBackend {
        blinded_last: Mutex<u32>,
        sighash_fails_at: Option<usize>,
    }

    #[async_trait]
    impl ProofBackend for FakeBackend {
        async fn decode_transaction(&self, _: &[u8]) -> Result<DecodedTransaction, LiquidError> {
            Err(LiquidError::Backend("unused".into()))
        }

        async fn unblind(
            &self,
            _: &TxOutputData,
            _: &SecretKey,
        ) -> Result<UnblindingData, LiquidError> {
            Err(LiquidError::Backend("unused".into()))
        }

        async fn blind_last(&self, pset: &mut Pset) -> Result<(), LiquidError> {
            *self.blinded_last.lock() += 1;
            for i in 0..pset.outputs().len() {
                let out = pset.output_mut(i)?;
                if out.needs_blinding() {
                    out.blinded = Some(BlindedOutput::default());
                }
            }
            Ok(())
        }

        async fn blind_non_last(&self, _: &mut Pset) -> Result<(), LiquidError> {
            Err(LiquidError::Blinding("not expected".into()))
        }

        fn sighash(&self, _: &Pset, i: usize, _: &Script) -> Result<[u8; 32], LiquidError> {
            if self.sighash_fails_at == Some(i) {
                return Err(LiquidError::Signing(format!("no sighash for input {i}")));
            }
            Ok(bitcoin::hashes::sha256::Hash::hash(&[i as u8]).to_byte_array())
        }

        async fn extract(&self, pset: &Pset) -> Result<ExtractedTransaction, LiquidError> {
            Ok(ExtractedTransaction {
                raw: vec![pset.inputs().len() as u8, pset.outputs().len() as u8],
                txid: Txid::from_byte_array([0xee; 32]),
            })
        }
    }

    struct FixedVsize(u64);

    impl VsizeEstimator for FixedVsize {
        fn estimate_vsize(&self, _: &Pset) -> u64 {
            self.0
        }
    }

    fn policy() -> AssetId {
        LIQUID_POLICY_ASSET
    }

    fn usdt() -> AssetId {
        AssetId::from_bytes([0xce; 32])
    }

    fn wallet_with(address_type: AddressType, funds: &[(AssetId, u64)]) -> LiquidWallet {
        let mut w = LiquidWallet::from_mnemonic(ABANDON, "", address_type, 20).unwrap();
        let utxos = funds
            .iter()
            .enumerate()
            .map(|(i, (asset, value))| LiquidUtxo {
                outpoint: OutPoint::new(Txid::from_byte_array([i as u8 + 1; 32]), 0),
                script_pubkey: w
                    .destination(Chain::External, i as u32)
                    .unwrap()
                    .script_pubkey,
                height: 100,
                unblinded: UnblindingData {
                    value: *value,
                    asset: *asset,
                    asset_blinding_factor: [7; 32],
                    value_blinding_factor: [9; 32],
                },
            })
            .collect();
        w.set_utxos(utxos);
        w
    }

    fn recipient(asset: AssetId, amount: u64) -> LiquidTarget {
        let secp = Secp256k1::new();
        LiquidTarget {
            script_pubkey: ScriptBuf::from_hex("0014751e76e8199196d454941c45d1b3a323f1433bd6")
                .unwrap(),
            blinding_key: Some(PublicKey::from_secret_key(
                &secp,
                &SecretKey::from_slice(&[0x11; 32]).unwrap(),
            )),
            asset,
            amount,
        }
    }

    fn engine(vsize: u64) -> (Arc<FakeBackend>, ConfidentialTxEngine) {
        let backend = Arc::new(FakeBackend::default());
        let engine = ConfidentialTxEngine::new(backend.clone(), EngineConfig::default())
            .with_estimator(Arc::new(FixedVsize(vsize)));
        (backend, engine)
    }

    fn roles(pset: &Pset) -> Vec<OutputRole> {
        pset.outputs().iter().map(|o| o.role).collect()
    }

    #[tokio::test]
    async fn three_inputs_two_recipients_change_and_fee() {
        let mut w = wallet_with(
            AddressType::NativeSegwit,
            &[(policy(), 10_000), (policy(), 10_000), (policy(), 10_000)],
        );
        let (backend, engine) = engine(2500);
        let targets = [recipient(policy(), 15_000), recipient(policy(), 10_000)];

        let (pset, _) = engine.build(&mut w, &targets).unwrap();
        assert_eq!(pset.inputs().len(), 3);
        assert_eq!(
            roles(&pset),
            vec![OutputRole::Recipient, OutputRole::Recipient, OutputRole::Change, OutputRole::Fee]
        );
        assert_eq!(pset.fee(), 275);
        assert_eq!(pset.outputs()[2].value, 5_000 - 275);

        let created = engine.create_transaction(&mut w, &targets).await.unwrap();
        assert_eq!(created.fee, 275);
        assert_eq!(created.hex, "0304");
        assert_eq!(*backend.blinded_last.lock(), 1);
    }

    #[test]
    fn outputs_balance_per_asset() {
        let mut w = wallet_with(
            AddressType::NativeSegwit,
            &[(policy(), 4_000), (usdt(), 700), (usdt(), 500)],
        );
        let (_, engine) = engine(1000);
        let (pset, _) = engine
            .build(&mut w, &[recipient(usdt(), 600), recipient(policy(), 1_000)])
            .unwrap();

        for asset in [policy(), usdt()] {
            let inputs: u64 = pset
                .inputs()
                .iter()
                .filter(|i| i.secrets.asset == asset)
                .map(|i| i.secrets.value)
                .sum();
            let outputs: u64 = pset
                .outputs()
                .iter()
                .filter(|o| o.asset == asset)
                .map(|o| o.value)
                .sum();
            assert_eq!(inputs, outputs, "asset {asset}");
        }
        assert_eq!(pset.fee(), 110);
    }

    #[test]
    fn fee_pulls_extra_policy_input() {
        let mut w = wallet_with(
            AddressType::NativeSegwit,
            &[(usdt(), 1_000), (policy(), 50), (policy(), 5_000)],
        );
        let (_, engine) = engine(1000);
        let (pset, selections) = engine.build(&mut w, &[recipient(usdt(), 1_000)]).unwrap();

        // no usdt change: the target spends the whole usdt balance
        assert!(!pset
            .outputs()
            .iter()
            .any(|o| o.asset == usdt() && o.role == OutputRole::Change));
        assert_eq!(selections.len(), 2);
        assert_eq!(selections[1].asset, policy());
        assert_eq!(pset.fee(), 110);
        let policy_change: u64 = pset
            .outputs()
            .iter()
            .filter(|o| o.asset == policy() && o.role == OutputRole::Change)
            .map(|o| o.value)
            .sum();
        let policy_in: u64 = pset
            .inputs()
            .iter()
            .filter(|i| i.secrets.asset == policy())
            .map(|i| i.secrets.value)
            .sum();
        assert_eq!(policy_in, policy_change + 110);
    }

    #[test]
    fn small_change_is_folded_into_fee() {
        let mut w = wallet_with(AddressType::NativeSegwit, &[(policy(), 10_110)]);
        let (_, engine) = engine(1000);
        let (pset, _) = engine.build(&mut w, &[recipient(policy(), 10_000)]).unwrap();
        assert_eq!(roles(&pset), vec![OutputRole::Recipient, OutputRole::Fee]);
        assert_eq!(pset.fee(), 110);
    }

    #[test]
    fn unpayable_fee_is_coin_selection_error() {
        let mut w = wallet_with(AddressType::NativeSegwit, &[(usdt(), 1_000), (policy(), 20)]);
        let (_, engine) = engine(1000);
        let err = engine.build(&mut w, &[recipient(usdt(), 1_000)]).unwrap_err();
        assert_eq!(
            err,
            LiquidError::CoinSelection {
                asset: policy(),
                target: 110,
                selected: 20,
            }
        );
    }

    #[test]
    fn missing_asset_is_coin_selection_error() {
        let mut w = wallet_with(AddressType::NativeSegwit, &[(policy(), 10_000)]);
        let (_, engine) = engine(1000);
        assert!(matches!(
            engine.build(&mut w, &[recipient(usdt(), 1)]),
            Err(LiquidError::CoinSelection { selected: 0, .. })
        ));
        assert!(matches!(
            engine.build(&mut w, &[]),
            Err(LiquidError::InvalidTarget(_))
        ));
    }

    #[test]
    fn build_is_deterministic() {
        let funds = [(policy(), 3_000), (policy(), 9_000), (policy(), 4_500), (usdt(), 80)];
        let (_, engine) = engine(1500);
        let targets = [recipient(policy(), 7_000), recipient(usdt(), 30)];
        let (a, _) = engine
            .build(&mut wallet_with(AddressType::NativeSegwit, &funds), &targets)
            .unwrap();
        let (b, _) = engine
            .build(&mut wallet_with(AddressType::NativeSegwit, &funds), &targets)
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn signatures_verify_against_backend_sighash() {
        for address_type in [AddressType::NativeSegwit, AddressType::NestedSegwit] {
            let mut w = wallet_with(address_type, &[(policy(), 6_000), (policy(), 6_000)]);
            let (backend, engine) = engine(1000);
            let (mut pset, _) = engine.build(&mut w, &[recipient(policy(), 11_000)]).unwrap();
            engine.blind(&mut pset).await.unwrap();
            engine.sign(&mut pset, &mut w).unwrap();
            assert_eq!(pset.stage(), PsetStage::Signed);

            let secp = Secp256k1::verification_only();
            for (i, input) in pset.inputs().iter().enumerate() {
                let [sig, pk] = input.witness.as_slice() else {
                    panic!("expected two witness items");
                };
                assert_eq!(*sig.last().unwrap(), 0x01);
                let signature = Signature::from_der(&sig[..sig.len() - 1]).unwrap();
                let pk = PublicKey::from_slice(pk).unwrap();
                let digest = backend.sighash(&pset, i, Script::new()).unwrap();
                secp.verify_ecdsa(&Message::from_digest(digest), &signature, &pk)
                    .unwrap();
                assert_eq!(input.script_sig.is_empty(), address_type == AddressType::NativeSegwit);
            }
        }
    }

    #[tokio::test]
    async fn failed_signing_leaves_inputs_unsigned() {
        let mut w = wallet_with(
            AddressType::NativeSegwit,
            &[(policy(), 6_000), (policy(), 6_000), (policy(), 6_000)],
        );
        let backend = Arc::new(FakeBackend {
            sighash_fails_at: Some(2),
            ..FakeBackend::default()
        });
        let engine = ConfidentialTxEngine::new(backend, EngineConfig::default())
            .with_estimator(Arc::new(FixedVsize(1000)));
        let (mut pset, _) = engine.build(&mut w, &[recipient(policy(), 17_000)]).unwrap();
        assert_eq!(pset.inputs().len(), 3);
        engine.blind(&mut pset).await.unwrap();
        let before = pset.clone();

        let err = engine.sign(&mut pset, &mut w).unwrap_err();

        assert_eq!(err, LiquidError::Signing("no sighash for input 2".into()));
        assert_eq!(pset, before);
        assert_eq!(pset.stage(), PsetStage::Blinded);
        assert!(pset.inputs().iter().all(|i| !i.is_signed()));
    }

    #[tokio::test]
    async fn watch_only_cannot_sign() {
        let spender = LiquidWallet::from_mnemonic(ABANDON, "", AddressType::NativeSegwit, 20).unwrap();
        let xpub = spender.hd().keys().account_xpub_slip132();
        let mut w = LiquidWallet::watch_only(
            &xpub,
            spender.master_blinding_key().clone(),
            AddressType::NativeSegwit,
            20,
        )
        .unwrap();
        let script = w.destination(Chain::External, 0).unwrap().script_pubkey;
        w.set_utxos(vec![LiquidUtxo {
            outpoint: OutPoint::new(Txid::from_byte_array([1; 32]), 0),
            script_pubkey: script,
            height: 1,
            unblinded: UnblindingData::explicit(5_000, policy()),
        }]);
        let (_, engine) = engine(1000);
        let err = engine
            .create_transaction(&mut w, &[recipient(policy(), 1_000)])
            .await
            .unwrap_err();
        assert_eq!(err, LiquidError::Wallet(brook_wallet::error::WalletError::WatchOnly));
    }
}
