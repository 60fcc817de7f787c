//! Local reconstruction of verbose transactions from raw bytes.
//!
//! Used when a server refuses `verbose=true` on `blockchain.transaction.get`.

use bitcoin::{Address, Network, Script, Transaction};

use brook_core::error::ChainError;

use crate::types::{ScriptPubKey, ScriptSig, VerboseInput, VerboseOutput, VerboseTransaction};

/// Decode a raw transaction hex into the verbose shape.
pub fn decode_transaction(raw_hex: &str, network: Network) -> Result<VerboseTransaction, ChainError> {
    let bytes = hex::decode(raw_hex.trim())
        .map_err(|e| ChainError::DecodeFallback(format!("bad hex: {e}")))?;
    let tx: Transaction = bitcoin::consensus::deserialize(&bytes)
        .map_err(|e| ChainError::DecodeFallback(e.to_string()))?;

    let vin = tx
        .input
        .iter()
        .map(|input| {
            let script_hex = hex::encode(input.script_sig.as_bytes());
            let witness = input.witness.iter().map(hex::encode).collect();
            if input.previous_output.is_null() {
                VerboseInput {
                    coinbase: Some(script_hex),
                    txid: None,
                    vout: None,
                    script_sig: None,
                    txinwitness: witness,
                    sequence: input.sequence.0,
                }
            } else {
                VerboseInput {
                    coinbase: None,
                    txid: Some(input.previous_output.txid),
                    vout: Some(input.previous_output.vout),
                    script_sig: Some(ScriptSig {
                        asm: input.script_sig.to_asm_string(),
                        hex: script_hex,
                    }),
                    txinwitness: witness,
                    sequence: input.sequence.0,
                }
            }
        })
        .collect();

    let vout = tx
        .output
        .iter()
        .zip(0u32..)
        .map(|(output, n)| {
            let (kind, address) = classify_script(&output.script_pubkey, network);
            VerboseOutput {
                value: output.value.to_btc(),
                n,
                script_pub_key: ScriptPubKey {
                    asm: output.script_pubkey.to_asm_string(),
                    hex: hex::encode(output.script_pubkey.as_bytes()),
                    kind: Some(kind.to_owned()),
                    address: address.clone(),
                    addresses: address.into_iter().collect(),
                },
            }
        })
        .collect();

    Ok(VerboseTransaction {
        txid: tx.compute_txid(),
        hash: tx.compute_wtxid().to_string(),
        version: tx.version.0,
        size: bytes.len() as u64,
        vsize: tx.vsize() as u64,
        weight: tx.weight().to_wu(),
        locktime: tx.lock_time.to_consensus_u32(),
        vin,
        vout,
        hex: raw_hex.trim().to_owned(),
        blockhash: None,
        confirmations: 0,
        time: None,
        blocktime: None,
    })
}

/// Script type name and address, trying legacy, script-hash, segwit v0 and
/// taproot templates in that order.
pub fn classify_script(script: &Script, network: Network) -> (&'static str, Option<String>) {
    let templates: [(fn(&Script) -> bool, &'static str); 5] = [
        (Script::is_p2pkh, "pubkeyhash"),
        (Script::is_p2sh, "scripthash"),
        (Script::is_p2wpkh, "witness_v0_keyhash"),
        (Script::is_p2wsh, "witness_v0_scripthash"),
        (Script::is_p2tr, "witness_v1_taproot"),
    ];
    for (matches, kind) in templates {
        if matches(script) {
            let address = Address::from_script(script, network)
                .ok()
                .map(|a| a.to_string());
            return (kind, address);
        }
    }
    if script.is_op_return() {
        return ("nulldata", None);
    }
    ("nonstandard", None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness, WPubkeyHash};

    fn sample_tx() -> Transaction {
        let mut witness = Witness::new();
        witness.push([0x30u8; 71]);
        witness.push([0x02u8; 33]);
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(bitcoin::Txid::all_zeros(), 3),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness,
            }],
            output: vec![
                TxOut {
                    value: Amount::from_sat(50_000),
                    script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros()),
                },
                TxOut {
                    value: Amount::ZERO,
                    script_pubkey: ScriptBuf::new_op_return([1u8, 2, 3]),
                },
            ],
        }
    }

    #[test]
    fn decodes_segwit_transaction() {
        let tx = sample_tx();
        let raw = bitcoin::consensus::encode::serialize_hex(&tx);
        let verbose = decode_transaction(&raw, Network::Bitcoin).unwrap();

        assert_eq!(verbose.txid, tx.compute_txid());
        assert_eq!(verbose.version, 2);
        assert_eq!(verbose.vin.len(), 1);
        assert_eq!(verbose.vin[0].vout, Some(3));
        assert_eq!(verbose.vin[0].txinwitness.len(), 2);
        assert_eq!(verbose.vout[0].value_sat(), 50_000);
        assert_eq!(
            verbose.vout[0].script_pub_key.kind.as_deref(),
            Some("witness_v0_keyhash")
        );
        assert!(verbose.vout[0].address().unwrap().starts_with("bc1q"));
        assert_eq!(verbose.vout[1].script_pub_key.kind.as_deref(), Some("nulldata"));
        assert!(verbose.vout[1].address().is_none());
        assert!(verbose.vsize < verbose.size);
    }

    #[test]
    fn testnet_addresses() {
        let script = ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros());
        let (kind, addr) = classify_script(&script, Network::Testnet);
        assert_eq!(kind, "witness_v0_keyhash");
        assert!(addr.unwrap().starts_with("tb1q"));
    }

    #[test]
    fn garbage_is_decode_fallback_error() {
        assert!(matches!(
            decode_transaction("zz", Network::Bitcoin),
            Err(ChainError::DecodeFallback(_))
        ));
        assert!(matches!(
            decode_transaction("0100", Network::Bitcoin),
            Err(ChainError::DecodeFallback(_))
        ));
    }
}
