//! Confidential payments between wallets with real Elements proofs.

use std::sync::Arc;

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Txid};

use brook_core::constants::LIQUID_POLICY_ASSET;
use brook_core::types::{AddressType, Chain};
use brook_liquid::{
    ConfidentialTxEngine, CreatedTransaction, ElementsBackend, EngineConfig, LiquidTarget,
    LiquidUtxo, LiquidWallet, ProofBackend, UnblindingData,
};
use brook_tests::helpers::{ABANDON, MemoryIndex};

fn wallet(passphrase: &str) -> LiquidWallet {
    LiquidWallet::from_mnemonic(ABANDON, passphrase, AddressType::NativeSegwit, 20).unwrap()
}

/// Wallet holding one confidential output that never touched the index.
fn faucet(value: u64) -> LiquidWallet {
    let mut w = wallet("faucet");
    let script_pubkey = w.destination(Chain::External, 0).unwrap().script_pubkey;
    w.set_utxos(vec![LiquidUtxo {
        outpoint: OutPoint::new(Txid::from_byte_array([0xfa; 32]), 0),
        script_pubkey,
        height: 1,
        unblinded: UnblindingData {
            value,
            asset: LIQUID_POLICY_ASSET,
            asset_blinding_factor: [3; 32],
            value_blinding_factor: [5; 32],
        },
    }]);
    w
}

fn pay(to: &mut LiquidWallet, amount: u64) -> LiquidTarget {
    let dest = to.receive_destination().unwrap();
    LiquidTarget {
        script_pubkey: dest.script_pubkey,
        blinding_key: Some(dest.blinding_key),
        asset: LIQUID_POLICY_ASSET,
        amount,
    }
}

/// Record `created` in the index the way a confidential server reports it.
async fn confirm(index: &MemoryIndex, backend: &ElementsBackend, created: &CreatedTransaction) {
    let raw = hex::decode(&created.hex).unwrap();
    let decoded = backend.decode_transaction(&raw).await.unwrap();
    assert_eq!(decoded.txid, created.txid);
    let outputs: Vec<_> = decoded
        .outputs
        .iter()
        .map(|o| (o.script_pubkey.clone(), o.explicit().map_or(0, |e| e.value)))
        .collect();
    let inputs: Vec<_> = created
        .selections
        .iter()
        .flat_map(|s| s.utxos.iter().map(|u| u.outpoint))
        .collect();
    index.apply(created.txid, raw, &inputs, &outputs);
}

fn policy_balance(w: &LiquidWallet) -> u64 {
    w.balances().get(&LIQUID_POLICY_ASSET).copied().unwrap_or(0)
}

#[tokio::test]
async fn received_output_is_spent_onwards() {
    let backend = Arc::new(ElementsBackend::new());
    let engine = ConfidentialTxEngine::new(backend.clone(), EngineConfig::default());
    let index = MemoryIndex::new();
    let mut source = faucet(100_000);
    let mut alice = wallet("");
    let mut bob = wallet("bob");

    let to_alice = pay(&mut alice, 70_000);
    let first = engine.create_transaction(&mut source, &[to_alice]).await.unwrap();
    confirm(&index, &backend, &first).await;

    let report = alice.sync(&index, backend.as_ref()).await.unwrap();
    assert_eq!(report.new_transactions, 1);
    assert_eq!(report.unblinded_outputs, 1);
    assert_eq!(policy_balance(&alice), 70_000);

    // Alice spends an output whose secrets came from unblinding.
    let to_bob = pay(&mut bob, 25_000);
    let second = engine.create_transaction(&mut alice, &[to_bob]).await.unwrap();
    confirm(&index, &backend, &second).await;

    bob.sync(&index, backend.as_ref()).await.unwrap();
    assert_eq!(policy_balance(&bob), 25_000);

    alice.sync(&index, backend.as_ref()).await.unwrap();
    assert_eq!(policy_balance(&alice), 70_000 - 25_000 - second.fee);

    source.sync(&index, backend.as_ref()).await.unwrap();
    assert_eq!(policy_balance(&source), 100_000 - 70_000 - first.fee);
}

#[tokio::test]
async fn outputs_for_others_stay_closed() {
    let backend = Arc::new(ElementsBackend::new());
    let engine = ConfidentialTxEngine::new(backend.clone(), EngineConfig::default());
    let index = MemoryIndex::new();
    let mut source = faucet(50_000);
    let mut bob = wallet("bob");
    let mut carol = wallet("carol");

    let to_bob = pay(&mut bob, 20_000);
    let created = engine.create_transaction(&mut source, &[to_bob]).await.unwrap();
    confirm(&index, &backend, &created).await;

    let raw = hex::decode(&created.hex).unwrap();
    let decoded = backend.decode_transaction(&raw).await.unwrap();
    let carol_key = carol
        .master_blinding_key()
        .blinding_private_key(&decoded.outputs[0].script_pubkey)
        .unwrap();
    assert!(backend.unblind(&decoded.outputs[0], &carol_key).await.is_err());

    let report = carol.sync(&index, backend.as_ref()).await.unwrap();
    assert_eq!(report.unblinded_outputs, 0);
    assert!(carol.balances().is_empty());
}
