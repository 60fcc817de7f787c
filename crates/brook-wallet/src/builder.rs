//! Plain transaction builder and signer.
//!
//! 1. Add recipients (address + amount, sweep, or OP_RETURN data)
//! 2. Build an unsigned transaction from the wallet's cached UTXOs
//! 3. Sign every input with the key found through the address reverse lookup

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, Network, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Txid, Witness,
};
use tracing::info;

use brook_core::types::AddressType;

use crate::coin_selection::{CoinSelection, CoinSelector, Destination, OutputTarget};
use crate::error::WalletError;
use crate::hd_index::HdAddressIndex;
use crate::keys::nested_redeem_script;

/// An unsigned transaction ready for signing.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    /// The transaction with empty script sigs and witnesses.
    pub tx: Transaction,
    /// The coin selection result used to build this transaction.
    pub selection: CoinSelection,
    /// Where change was sent, if a change output exists.
    pub change_address: Option<String>,
}

/// A fully signed transaction.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub tx: Transaction,
    /// Consensus-serialized hex, ready for broadcast.
    pub hex: String,
    pub txid: Txid,
    pub fee: u64,
    /// Change value, if any.
    pub change: Option<u64>,
}

/// Builder for constructing and signing transactions.
///
/// # Example
/// ```ignore
/// let unsigned = TransactionBuilder::new(fee_rate)
///     .add_recipient("bc1q...", 50_000)
///     .build(&mut index)?;
/// let signed = TransactionBuilder::sign(unsigned, &mut index)?;
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    targets: Vec<OutputTarget>,
    fee_rate: u64,
    lock_time: u32,
    rbf: bool,
}

impl TransactionBuilder {
    /// New builder at `fee_rate` sat/vB, RBF signalled.
    pub fn new(fee_rate: u64) -> Self {
        Self {
            targets: Vec::new(),
            fee_rate,
            lock_time: 0,
            rbf: true,
        }
    }

    pub fn add_recipient(&mut self, address: impl Into<String>, amount: u64) -> &mut Self {
        self.targets.push(OutputTarget::pay(address, amount));
        self
    }

    /// Send everything left after fee to `address`.
    pub fn sweep_to(&mut self, address: impl Into<String>) -> &mut Self {
        self.targets.push(OutputTarget::sweep(address));
        self
    }

    /// Zero-value OP_RETURN output carrying `data`.
    pub fn add_op_return(&mut self, data: &[u8]) -> Result<&mut Self, WalletError> {
        let push = PushBytesBuf::try_from(data.to_vec())
            .map_err(|e| WalletError::BuildError(format!("op_return payload: {e}")))?;
        self.targets
            .push(OutputTarget::script(ScriptBuf::new_op_return(push), 0));
        Ok(self)
    }

    pub fn set_fee_rate(&mut self, fee_rate: u64) -> &mut Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn set_lock_time(&mut self, lock_time: u32) -> &mut Self {
        self.lock_time = lock_time;
        self
    }

    /// Signal replace-by-fee (default: on).
    pub fn set_rbf(&mut self, rbf: bool) -> &mut Self {
        self.rbf = rbf;
        self
    }

    /// Select coins from the wallet's cached UTXOs and lay out the
    /// transaction. Change goes to the address at the internal frontier.
    pub fn build(&self, wallet: &mut HdAddressIndex) -> Result<UnsignedTransaction, WalletError> {
        if self.targets.is_empty() {
            return Err(WalletError::BuildError("no recipients".into()));
        }
        for target in &self.targets {
            if let (Destination::Address(address), Some(0)) = (&target.destination, target.value) {
                return Err(WalletError::InvalidAmount(format!(
                    "zero amount to {address}"
                )));
            }
        }

        let network = wallet.keys().network();
        let address_type = wallet.keys().address_type();
        let selection =
            CoinSelector::new(address_type).select(wallet.utxos(), &self.targets, self.fee_rate)?;

        let sequence = if self.rbf {
            Sequence::ENABLE_RBF_NO_LOCKTIME
        } else {
            Sequence::ENABLE_LOCKTIME_NO_RBF
        };
        let input = selection
            .inputs
            .iter()
            .map(|utxo| TxIn {
                previous_output: OutPoint::new(utxo.txid, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            })
            .collect();

        let mut change_address = None;
        let mut output = Vec::with_capacity(selection.outputs.len());
        for selected in &selection.outputs {
            let script_pubkey = match &selected.destination {
                Destination::Address(address) => parse_address(address, network)?.script_pubkey(),
                Destination::Script(script) => script.clone(),
                Destination::Change => {
                    let address = wallet.current_change_address()?;
                    let script = parse_address(&address, network)?.script_pubkey();
                    change_address = Some(address);
                    script
                }
            };
            output.push(TxOut {
                value: Amount::from_sat(selected.value),
                script_pubkey,
            });
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::from_consensus(self.lock_time),
            input,
            output,
        };

        Ok(UnsignedTransaction {
            tx,
            selection,
            change_address,
        })
    }

    /// Sign every input. Inputs are p2wpkh or p2sh-p2wpkh depending on the
    /// wallet's address type.
    pub fn sign(
        unsigned: UnsignedTransaction,
        wallet: &mut HdAddressIndex,
    ) -> Result<SignedTransaction, WalletError> {
        let address_type = wallet.keys().address_type();
        let mut keys = Vec::with_capacity(unsigned.selection.inputs.len());
        for utxo in &unsigned.selection.inputs {
            keys.push(wallet.private_key_for_address(&utxo.address)?);
        }

        let secp = wallet.keys().secp();
        let mut tx = unsigned.tx;

        let mut signed = Vec::with_capacity(keys.len());
        {
            let mut cache = SighashCache::new(&tx);
            for (i, (key, utxo)) in keys.iter().zip(&unsigned.selection.inputs).enumerate() {
                let pk = CompressedPublicKey::from_private_key(secp, key)
                    .map_err(|e| WalletError::Signing(e.to_string()))?;
                let program = nested_redeem_script(&pk);
                let sighash = cache
                    .p2wpkh_signature_hash(
                        i,
                        &program,
                        Amount::from_sat(utxo.value),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| WalletError::Signing(e.to_string()))?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let signature = bitcoin::ecdsa::Signature {
                    signature: secp.sign_ecdsa(&msg, &key.inner),
                    sighash_type: EcdsaSighashType::All,
                };
                signed.push((pk, program, signature));
            }
        }

        for (txin, (pk, program, signature)) in tx.input.iter_mut().zip(signed) {
            txin.witness = Witness::p2wpkh(&signature, &pk.0);
            if address_type == AddressType::NestedSegwit {
                let push = PushBytesBuf::try_from(program.to_bytes())
                    .map_err(|e| WalletError::Signing(e.to_string()))?;
                txin.script_sig = ScriptBuf::builder().push_slice(push).into_script();
            }
        }

        let txid = tx.compute_txid();
        let hex = bitcoin::consensus::encode::serialize_hex(&tx);
        let fee = unsigned.selection.fee;
        let change = unsigned.selection.change().map(|c| c.value);
        info!(
            %txid,
            fee,
            inputs = tx.input.len(),
            outputs = tx.output.len(),
            vsize = tx.vsize(),
            "transaction signed"
        );

        Ok(SignedTransaction {
            tx,
            hex,
            txid,
            fee,
            change,
        })
    }

    /// [`build`](Self::build) then [`sign`](Self::sign).
    pub fn build_and_sign(
        &self,
        wallet: &mut HdAddressIndex,
    ) -> Result<SignedTransaction, WalletError> {
        let unsigned = self.build(wallet)?;
        Self::sign(unsigned, wallet)
    }
}

fn parse_address(address: &str, network: Network) -> Result<Address, WalletError> {
    Address::<NetworkUnchecked>::from_str(address)
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))?
        .require_network(network)
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))
}
