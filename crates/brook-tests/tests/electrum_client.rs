//! Chain-index client against a scripted in-memory Electrum server.
//!
//! Covers:
//! - Handshake, server banner and capability detection
//! - Peer rotation, saved peer, exhausted attempts
//! - Reconnect after a server-side drop; forced disconnect stays down
//! - Batched vs fanned-out multi-calls, chunking, per-element errors
//! - Verbose-transaction and fee-histogram fallbacks
//! - Header notifications driving the block clock

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::hashes::Hash;
use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness, absolute,
    transaction,
};
use serde_json::{Value, json};

use brook_core::constants::AVG_BLOCK_INTERVAL_SECS;
use brook_core::error::{ChainError, RpcError};
use brook_core::traits::ChainIndex;
use brook_core::types::ScriptHash;
use brook_electrum::{ConnectionStatus, ElectrumClient, FeeEstimates};
use brook_tests::helpers::{
    GENESIS_HEADER_HEX, GENESIS_TIME, MockElectrum, Reply, TIP_HEIGHT, eventually, peer,
    test_config,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn scripthashes(n: usize) -> Vec<ScriptHash> {
    (0..n)
        .map(|i| ScriptHash::from_script(&ScriptBuf::from_bytes((i as u32).to_le_bytes().to_vec())))
        .collect()
}

fn sample_tx() -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([7; 32]), 1),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: ScriptBuf::from_hex("0014c0cebcd6c3d3ca8c75dc5ec62ebe55330ef910e2")
                .unwrap(),
        }],
    }
}

async fn connected(
    banner: &str,
    handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static,
) -> (MockElectrum, ElectrumClient) {
    let server = MockElectrum::new(banner, handler);
    let client = server.client(vec![peer("electrum.test")]);
    client.connect().await.unwrap();
    (server, client)
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_records_server_and_tip() {
    let server = MockElectrum::handshake_only("Fulcrum 1.9.1");
    let client = server.client(vec![peer("electrum.test")]);
    assert_eq!(client.status(), ConnectionStatus::Idle);

    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(client.server_name().as_deref(), Some("Fulcrum 1.9.1"));
    assert!(client.batching_enabled());
    let clock = client.block_clock();
    assert!(clock.has_observed());
    assert_eq!(clock.latest(), (TIP_HEIGHT, GENESIS_TIME));

    let state = client.connection_state();
    assert_eq!(state.peer, Some(peer("electrum.test")));
    assert!(!state.verbose_unsupported);
}

#[tokio::test]
async fn batching_follows_server_banner() {
    for (banner, expected) in [
        ("ElectrumPersonalServer 0.2.4", false),
        ("electrs/0.8.12", false),
        ("electrs/0.9.10", true),
        ("Fulcrum 1.8.2", false),
        ("ElectrumX 1.16.0", true),
    ] {
        let server = MockElectrum::handshake_only(banner);
        let client = server.client(vec![peer("electrum.test")]);
        client.connect().await.unwrap();
        assert_eq!(client.batching_enabled(), expected, "{banner}");
    }
}

#[tokio::test]
async fn refused_peers_are_skipped() {
    let server = MockElectrum::handshake_only("ElectrumX 1.16.0");
    server.refuse("down.test");
    let client = server.client(vec![peer("down.test"), peer("up.test")]);

    client.connect().await.unwrap();

    let hosts: Vec<String> = server.connections().into_iter().map(|p| p.host).collect();
    assert_eq!(hosts, vec!["down.test", "up.test"]);
    assert_eq!(client.connection_state().peer, Some(peer("up.test")));
}

#[tokio::test]
async fn saved_peer_is_tried_first() {
    let server = MockElectrum::handshake_only("ElectrumX 1.16.0");
    let mut config = test_config(vec![peer("a.test"), peer("b.test")]);
    config.saved_peer = Some(peer("saved.test"));
    let client = ElectrumClient::new(config, Arc::new(server.clone()));

    client.connect().await.unwrap();

    assert_eq!(server.connections()[0].host, "saved.test");
    assert_eq!(client.connection_state().peer, Some(peer("saved.test")));
}

#[tokio::test]
async fn exhausted_peers_fail_with_attempt_count() {
    let server = MockElectrum::handshake_only("ElectrumX 1.16.0");
    server.refuse("a.test");
    server.refuse("b.test");
    let client = server.client(vec![peer("a.test"), peer("b.test")]);

    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, ChainError::Connection { attempts: 2, .. }), "{err:?}");
    assert_eq!(client.status(), ConnectionStatus::Failed(2));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn bad_banner_fails_handshake() {
    let server = MockElectrum::new("unused", |method, _| match method {
        "server.version" => Reply::Result(json!({"unexpected": true})),
        _ => Reply::Unhandled,
    });
    let client = server.client(vec![peer("electrum.test")]);
    assert!(client.connect().await.is_err());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn reconnects_after_server_drop() {
    let (server, client) = connected("ElectrumX 1.16.0", |_, _| Reply::Unhandled).await;
    assert_eq!(server.connections().len(), 1);

    server.drop_connections();

    assert!(eventually(|| server.connections().len() >= 2).await);
    assert!(client.wait_till_connected(Duration::from_secs(2)).await);
    client.ping().await.unwrap();
}

#[tokio::test]
async fn forced_disconnect_stays_down() {
    let (server, client) = connected("ElectrumX 1.16.0", |_, _| Reply::Unhandled).await;

    client.force_disconnect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!client.is_connected());
    assert_eq!(client.status(), ConnectionStatus::Idle);
    assert_eq!(server.connections().len(), 1);
    assert_eq!(
        client.ping().await.unwrap_err(),
        ChainError::Rpc(RpcError::NotConnected)
    );

    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(server.connections().len(), 2);
}

#[tokio::test]
async fn silent_server_times_out() {
    let server = MockElectrum::new("ElectrumX 1.16.0", |method, _| match method {
        "server.ping" => Reply::Silent,
        _ => Reply::Unhandled,
    });
    let mut config = test_config(vec![peer("electrum.test")]);
    config.request_timeout = Duration::from_millis(200);
    let client = ElectrumClient::new(config, Arc::new(server));
    client.connect().await.unwrap();

    let err = client.ping().await.unwrap_err();
    assert!(
        matches!(err, ChainError::Rpc(RpcError::RequestTimeout { ref method, .. }) if method == "server.ping"),
        "{err:?}"
    );
}

// ---------------------------------------------------------------------------
// Multi-calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batches_are_chunked() {
    let (server, client) = connected("Fulcrum 1.9.1", |method, _| match method {
        "blockchain.scripthash.get_history" => Reply::Result(json!([])),
        _ => Reply::Unhandled,
    })
    .await;

    let hashes = scripthashes(150);
    let histories = client.multi_get_history(&hashes).await.unwrap();

    assert_eq!(histories.len(), 150);
    let frames = server.frames("blockchain.scripthash.get_history");
    let sizes: Vec<Option<usize>> = frames.iter().map(|f| f.batch).collect();
    assert_eq!(sizes, vec![Some(100), Some(50)]);
}

#[tokio::test]
async fn fan_out_without_batching() {
    let (server, client) = connected("ElectrumPersonalServer 0.2.4", |method, _| match method {
        "blockchain.scripthash.get_balance" => {
            Reply::Result(json!({"confirmed": 1_000, "unconfirmed": -200}))
        }
        _ => Reply::Unhandled,
    })
    .await;

    let hashes = scripthashes(3);
    let balances = client.multi_get_balance(&hashes).await.unwrap();

    assert_eq!(balances.len(), 3);
    assert!(balances.values().all(|b| b.total() == 800));
    let frames = server.frames("blockchain.scripthash.get_balance");
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.batch.is_none()));
}

#[tokio::test]
async fn element_errors_leave_gaps() {
    for banner in ["Fulcrum 1.9.1", "ElectrumPersonalServer 0.2.4"] {
        let hashes = scripthashes(4);
        let bad: HashSet<String> = [hashes[1].to_hex(), hashes[3].to_hex()].into();
        let (_, client) = connected(banner, move |method, params| match method {
            "blockchain.scripthash.get_balance" => {
                if bad.contains(params[0].as_str().unwrap_or_default()) {
                    Reply::Error(1, "history too large".into())
                } else {
                    Reply::Result(json!({"confirmed": 5, "unconfirmed": 0}))
                }
            }
            _ => Reply::Unhandled,
        })
        .await;

        let balances = client.multi_get_balance(&hashes).await.unwrap();
        let mut found: Vec<&ScriptHash> = balances.keys().collect();
        found.sort();
        let mut expected = vec![&hashes[0], &hashes[2]];
        expected.sort();
        assert_eq!(found, expected, "{banner}");
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn verbose_refusal_falls_back_to_local_decode() {
    let tx = sample_tx();
    let raw = bitcoin::consensus::encode::serialize_hex(&tx);
    let (server, client) = connected("electrs/0.10.0", move |method, params| match method {
        "blockchain.transaction.get" if params.get(1) == Some(&json!(true)) => {
            Reply::Error(-32600, "verbose transactions are currently unsupported".into())
        }
        "blockchain.transaction.get" => Reply::Result(json!(raw)),
        _ => Reply::Unhandled,
    })
    .await;
    let txid = tx.compute_txid();

    let first = client.get_transaction(&txid).await.unwrap();
    assert_eq!(first.txid, txid);
    assert_eq!(first.vout[0].value_sat(), 50_000);
    assert!(client.connection_state().verbose_unsupported);
    assert_eq!(server.frames("blockchain.transaction.get").len(), 2);

    // The refusal is remembered for the session.
    let second = client.get_transaction(&txid).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(server.frames("blockchain.transaction.get").len(), 3);
}

#[tokio::test]
async fn hex_answer_to_verbose_request_is_decoded() {
    let tx = sample_tx();
    let raw = bitcoin::consensus::encode::serialize_hex(&tx);
    let (_, client) = connected("ElectrumX 1.16.0", move |method, _| match method {
        "blockchain.transaction.get" => Reply::Result(json!(raw)),
        _ => Reply::Unhandled,
    })
    .await;

    let txid = tx.compute_txid();
    let found = client.multi_get_transactions(&[txid]).await.unwrap();
    assert_eq!(found[&txid].txid, txid);
    assert!(!client.connection_state().verbose_unsupported);
}

#[tokio::test]
async fn raw_transaction_bytes() {
    let tx = sample_tx();
    let raw = bitcoin::consensus::encode::serialize_hex(&tx);
    let expected = hex::decode(&raw).unwrap();
    let (_, client) = connected("ElectrumX 1.16.0", move |method, _| match method {
        "blockchain.transaction.get" => Reply::Result(json!(raw)),
        _ => Reply::Unhandled,
    })
    .await;

    let bytes = client.get_raw_transaction(&tx.compute_txid()).await.unwrap();
    assert_eq!(bytes, expected);
}

#[tokio::test]
async fn broadcast_returns_server_txid() {
    let tx = sample_tx();
    let txid = tx.compute_txid().to_string();
    let answer = txid.clone();
    let (_, client) = connected("ElectrumX 1.16.0", move |method, _| match method {
        "blockchain.transaction.broadcast" => Reply::Result(json!(answer)),
        _ => Reply::Unhandled,
    })
    .await;

    let hex = bitcoin::consensus::encode::serialize_hex(&tx);
    assert_eq!(client.broadcast(&hex).await.unwrap(), txid);
}

#[tokio::test]
async fn broadcast_rejection_is_a_protocol_error() {
    let (_, client) = connected("ElectrumX 1.16.0", |method, _| match method {
        "blockchain.transaction.broadcast" => Reply::Error(1, "min relay fee not met".into()),
        _ => Reply::Unhandled,
    })
    .await;

    let err = client.broadcast("00").await.unwrap_err();
    assert!(matches!(err, ChainError::Rpc(RpcError::Protocol { code: 1, .. })), "{err:?}");
}

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_histogram_uses_historical_estimates() {
    let (_, client) = connected("ElectrumX 1.16.0", |method, _| match method {
        "blockchain.estimatefee" => Reply::Result(json!(0.0001)),
        _ => Reply::Unhandled,
    })
    .await;

    assert_eq!(client.fee_histogram().await.unwrap(), None);
    assert_eq!(
        client.estimate_fees().await.unwrap(),
        FeeEstimates {
            fast: 10,
            medium: 10,
            slow: 10,
        }
    );
}

#[tokio::test]
async fn histogram_sets_fast_rate() {
    let (_, client) = connected("ElectrumX 1.16.0", |method, _| match method {
        "mempool.get_fee_histogram" => Reply::Result(json!([[40.0, 2_000_000], [5.0, 2_000_000]])),
        "blockchain.estimatefee" => Reply::Result(json!(0.0001)),
        _ => Reply::Unhandled,
    })
    .await;

    let estimates = client.estimate_fees().await.unwrap();
    assert!(estimates.fast >= 2);
    assert!(estimates.slow <= estimates.medium && estimates.medium <= estimates.fast);
}

#[tokio::test]
async fn relay_fee_in_sat_per_kvb() {
    let (_, client) = connected("ElectrumX 1.16.0", |method, _| match method {
        "blockchain.relayfee" => Reply::Result(json!(0.00001)),
        _ => Reply::Unhandled,
    })
    .await;

    assert_eq!(client.relay_fee().await.unwrap(), 1_000);
}

// ---------------------------------------------------------------------------
// Block clock
// ---------------------------------------------------------------------------

#[tokio::test]
async fn header_notifications_advance_the_clock() {
    let (server, client) = connected("ElectrumX 1.16.0", |_, _| Reply::Unhandled).await;
    assert_eq!(client.block_clock().latest().0, TIP_HEIGHT);

    server.notify(
        "blockchain.headers.subscribe",
        json!([{"height": TIP_HEIGHT + 1, "hex": GENESIS_HEADER_HEX}]),
    );

    assert!(eventually(|| client.block_clock().latest().0 == TIP_HEIGHT + 1).await);
    assert_eq!(
        client.calculate_block_time(TIP_HEIGHT + 2),
        GENESIS_TIME as i64 + AVG_BLOCK_INTERVAL_SECS as i64
    );
}
