//! HD address discovery, balances and spending against chain indexes.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use brook_core::traits::ChainIndex;
use brook_core::types::{AddressType, Chain};
use brook_tests::helpers::{ABANDON, MemoryIndex, MockElectrum, Reply, peer};
use brook_wallet::builder::TransactionBuilder;
use brook_wallet::config::WalletConfig;
use brook_wallet::error::WalletError;
use brook_wallet::hd_index::HdAddressIndex;

const FOREIGN: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

fn wallet(gap_limit: u32) -> HdAddressIndex {
    let config = WalletConfig {
        gap_limit,
        ..WalletConfig::mainnet(AddressType::NativeSegwit)
    };
    HdAddressIndex::from_mnemonic(ABANDON, "", &config).unwrap()
}

fn mark(index: &MemoryIndex, wallet: &mut HdAddressIndex, chain: Chain, i: u32) {
    let derived = wallet.derive(chain, i).unwrap();
    index.mark_used(&derived.script_pubkey);
}

#[tokio::test]
async fn receive_address_skips_used() {
    let index = MemoryIndex::new();
    let mut w = wallet(20);
    mark(&index, &mut w, Chain::External, 0);
    mark(&index, &mut w, Chain::External, 1);

    let address = w.next_receive_address(&index).await.unwrap();

    assert_eq!(address, w.address_at(Chain::External, 2).unwrap());
    assert_eq!(w.next_free_index(Chain::External), 2);
    assert_eq!(w.next_free_index(Chain::Internal), 0);
}

#[tokio::test]
async fn used_addresses_around_a_single_free_one() {
    let index = MemoryIndex::new();
    let mut w = wallet(20);
    for i in (0..=20).filter(|i| *i != 3) {
        mark(&index, &mut w, Chain::External, i);
    }

    let address = w.next_receive_address(&index).await.unwrap();

    assert_eq!(address, w.address_at(Chain::External, 3).unwrap());
    assert_eq!(w.next_free_index(Chain::External), 3);

    // The used addresses past the gap still count once the wallet rescans.
    w.rescan(&index).await.unwrap();
    assert_eq!(w.next_free_index(Chain::External), 21);
}

#[tokio::test]
async fn first_receive_address_of_fresh_wallet() {
    let index = MemoryIndex::new();
    let mut w = wallet(20);
    assert_eq!(
        w.next_receive_address(&index).await.unwrap(),
        "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
    );
}

#[tokio::test]
async fn exhausted_gap_reuses_last_scanned() {
    let index = MemoryIndex::new();
    let mut w = wallet(3);
    for i in 0..=3 {
        mark(&index, &mut w, Chain::Internal, i);
    }

    let address = w.next_change_address(&index).await.unwrap();

    assert_eq!(address, w.address_at(Chain::Internal, 3).unwrap());
    assert_eq!(w.next_free_index(Chain::Internal), 3);
}

#[tokio::test]
async fn rescan_crosses_gaps_within_the_limit() {
    let index = MemoryIndex::new();
    let mut w = wallet(20);
    mark(&index, &mut w, Chain::External, 0);
    mark(&index, &mut w, Chain::External, 25);
    mark(&index, &mut w, Chain::Internal, 4);

    w.rescan(&index).await.unwrap();

    assert_eq!(w.next_free_index(Chain::External), 26);
    assert_eq!(w.next_free_index(Chain::Internal), 5);
}

#[tokio::test]
async fn rescan_never_moves_frontier_back() {
    let index = MemoryIndex::new();
    let mut w = wallet(20);
    w.set_next_free_index(Chain::External, 40);
    mark(&index, &mut w, Chain::External, 3);

    w.rescan(&index).await.unwrap();

    assert_eq!(w.next_free_index(Chain::External), 40);
}

#[tokio::test]
async fn balance_and_utxos_cover_both_chains() {
    let index = MemoryIndex::new();
    let mut w = wallet(20);
    let receive = w.derive(Chain::External, 2).unwrap();
    let change = w.derive(Chain::Internal, 0).unwrap();
    index.fund(&receive.script_pubkey, 70_000);
    index.fund(&change.script_pubkey, 30_000);

    let balance = w.fetch_balance(&index).await.unwrap();
    assert_eq!(balance.confirmed, 100_000);
    assert_eq!(w.next_free_index(Chain::External), 3);
    assert_eq!(w.next_free_index(Chain::Internal), 1);

    let utxos = w.fetch_utxos(&index).await.unwrap();
    let addresses: HashSet<&str> = utxos.iter().map(|u| u.address.as_str()).collect();
    assert_eq!(utxos.len(), 2);
    assert!(addresses.contains(receive.address.as_str()));
    assert!(addresses.contains(change.address.as_str()));
}

#[tokio::test]
async fn spend_and_see_change() {
    let index = MemoryIndex::new();
    let mut w = wallet(20);
    let funded = w.derive(Chain::External, 0).unwrap();
    index.fund(&funded.script_pubkey, 100_000);
    w.fetch_utxos(&index).await.unwrap();

    let signed = TransactionBuilder::new(2)
        .add_recipient(FOREIGN, 30_000)
        .build_and_sign(&mut w)
        .unwrap();
    let change = signed.change.unwrap();
    assert_eq!(30_000 + change + signed.fee, 100_000);

    let txid = index.broadcast(&signed.hex).await.unwrap();
    assert_eq!(txid, signed.txid.to_string());

    let balance = w.fetch_balance(&index).await.unwrap();
    assert_eq!(balance.confirmed, 0);
    assert_eq!(balance.unconfirmed, change as i64);
    let utxos = w.fetch_utxos(&index).await.unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].txid, signed.txid);
}

#[tokio::test]
async fn watch_only_discovers_but_cannot_sign() {
    let index = MemoryIndex::new();
    let mut full = wallet(20);
    let xpub = full.keys().account_xpub().to_string();
    let config = WalletConfig::mainnet(AddressType::NativeSegwit);
    let mut watch = HdAddressIndex::from_xpub(&xpub, &config).unwrap();

    let funded = full.derive(Chain::External, 1).unwrap();
    index.fund(&funded.script_pubkey, 50_000);
    watch.fetch_utxos(&index).await.unwrap();
    assert_eq!(watch.utxos().len(), 1);

    let err = TransactionBuilder::new(1)
        .add_recipient(FOREIGN, 10_000)
        .build_and_sign(&mut watch)
        .unwrap_err();
    assert_eq!(err, WalletError::WatchOnly);
}

#[tokio::test]
async fn rescan_over_electrum_batches_each_chunk() {
    let mut w = wallet(20);
    let used: HashSet<String> = [
        w.derive(Chain::External, 0).unwrap().scripthash.to_hex(),
        w.derive(Chain::External, 21).unwrap().scripthash.to_hex(),
    ]
    .into();
    let queried = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&queried);
    let server = MockElectrum::new("Fulcrum 1.9.1", move |method, params| match method {
        "blockchain.scripthash.get_history" => {
            *counter.lock() += 1;
            let sh = params[0].as_str().unwrap_or_default();
            if used.contains(sh) {
                Reply::Result(json!([{
                    "tx_hash": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
                    "height": 1,
                }]))
            } else {
                Reply::Result(json!([]))
            }
        }
        _ => Reply::Unhandled,
    });
    let client = server.client(vec![peer("electrum.test")]);
    client.connect().await.unwrap();

    w.rescan(&client).await.unwrap();

    assert_eq!(w.next_free_index(Chain::External), 22);
    assert_eq!(w.next_free_index(Chain::Internal), 0);
    // External: three chunks of 20, internal: one.
    let frames = server.frames("blockchain.scripthash.get_history");
    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(|f| f.batch == Some(20)));
    assert_eq!(*queried.lock(), 80);
}
