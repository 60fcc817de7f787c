//! Shared helpers for the integration tests.
//!
//! - [`MockElectrum`]: scripted Electrum server reached through in-memory
//!   duplex pipes; also a [`Connector`] so an [`ElectrumClient`] can dial it
//! - [`MemoryIndex`]: in-memory [`ChainIndex`] that applies broadcasts
//! - [`ToyTx`] / [`FakeProofBackend`]: a transparent stand-in for the
//!   confidential-proof library

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::hashes::{Hash, sha256, sha256d};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{OutPoint, Script, ScriptBuf, Transaction, Txid};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{broadcast, watch};

use brook_core::error::ChainError;
use brook_core::traits::ChainIndex;
use brook_core::types::{AssetId, Balance, HistoryEntry, Peer, ScriptHash, UnspentEntry};
use brook_electrum::{BoxedStream, Connector, ElectrumClient, ElectrumConfig};
use brook_liquid::{
    AssetField, BlindedOutput, DecodedTransaction, ExtractedTransaction, LiquidError, ProofBackend,
    Pset, TxOutputData, UnblindingData, ValueField,
};

pub const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// Mainnet genesis header (time 1231006505).
pub const GENESIS_HEADER_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";
pub const GENESIS_TIME: u64 = 1_231_006_505;
pub const TIP_HEIGHT: u64 = 800_000;

// ======================================================================
// Scripted Electrum server
// ======================================================================

/// How the scripted server answers one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(Value),
    Error(i64, String),
    /// Never answer.
    Silent,
    /// Fall through to the built-in handshake answers.
    Unhandled,
}

/// One request frame the server received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logged {
    pub method: String,
    /// Batch size if the frame was a batch.
    pub batch: Option<usize>,
}

type Handler = dyn Fn(&str, &Value) -> Reply + Send + Sync;

struct MockState {
    banner: Mutex<String>,
    handler: Box<Handler>,
    refused: Mutex<HashSet<String>>,
    connections: Mutex<Vec<Peer>>,
    requests: Mutex<Vec<Logged>>,
    kill: watch::Sender<u64>,
    push: broadcast::Sender<Value>,
}

impl MockState {
    fn answer(&self, request: &Value) -> Option<Value> {
        let id = request.get("id")?.clone();
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let mut reply = (self.handler)(method, &params);
        if reply == Reply::Unhandled {
            reply = match method {
                "server.version" => Reply::Result(json!([self.banner.lock().clone(), "1.4"])),
                "server.ping" => Reply::Result(Value::Null),
                "blockchain.headers.subscribe" => {
                    Reply::Result(json!({"height": TIP_HEIGHT, "hex": GENESIS_HEADER_HEX}))
                }
                _ => Reply::Error(-32601, format!("unknown method {method}")),
            };
        }

        match reply {
            Reply::Result(result) => Some(json!({"jsonrpc": "2.0", "id": id, "result": result})),
            Reply::Error(code, message) => Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": code, "message": message},
            })),
            Reply::Silent | Reply::Unhandled => None,
        }
    }

    fn log(&self, request: &Value) {
        let (method, batch) = match request {
            Value::Array(items) => (
                items.first().and_then(|r| r.get("method")).and_then(Value::as_str),
                Some(items.len()),
            ),
            single => (single.get("method").and_then(Value::as_str), None),
        };
        self.requests.lock().push(Logged {
            method: method.unwrap_or_default().to_string(),
            batch,
        });
    }
}

/// A scripted Electrum server. Cloning shares the same server.
#[derive(Clone)]
pub struct MockElectrum {
    state: Arc<MockState>,
}

impl MockElectrum {
    pub fn new(
        banner: &str,
        handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    ) -> Self {
        let (kill, _) = watch::channel(0);
        let (push, _) = broadcast::channel(16);
        Self {
            state: Arc::new(MockState {
                banner: Mutex::new(banner.to_string()),
                handler: Box::new(handler),
                refused: Mutex::new(HashSet::new()),
                connections: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                kill,
                push,
            }),
        }
    }

    /// Server that only knows the handshake.
    pub fn handshake_only(banner: &str) -> Self {
        Self::new(banner, |_, _| Reply::Unhandled)
    }

    pub fn set_banner(&self, banner: &str) {
        *self.state.banner.lock() = banner.to_string();
    }

    /// Refuse TCP connections addressed to `host`.
    pub fn refuse(&self, host: &str) {
        self.state.refused.lock().insert(host.to_string());
    }

    pub fn accept(&self, host: &str) {
        self.state.refused.lock().remove(host);
    }

    /// Every peer dialed so far, refused ones included.
    pub fn connections(&self) -> Vec<Peer> {
        self.state.connections.lock().clone()
    }

    pub fn requests(&self) -> Vec<Logged> {
        self.state.requests.lock().clone()
    }

    /// Frames (single or batch) carrying `method`.
    pub fn frames(&self, method: &str) -> Vec<Logged> {
        self.requests()
            .into_iter()
            .filter(|l| l.method == method)
            .collect()
    }

    /// Close every open server-side pipe.
    pub fn drop_connections(&self) {
        self.state.kill.send_modify(|generation| *generation += 1);
    }

    /// Push a notification to every open connection.
    pub fn notify(&self, method: &str, params: Value) {
        let _ = self
            .state
            .push
            .send(json!({"jsonrpc": "2.0", "method": method, "params": params}));
    }

    /// Client over this server with short retry timings.
    pub fn client(&self, peers: Vec<Peer>) -> ElectrumClient {
        ElectrumClient::new(test_config(peers), Arc::new(self.clone()))
    }
}

#[async_trait]
impl Connector for MockElectrum {
    async fn connect(&self, peer: &Peer) -> io::Result<BoxedStream> {
        self.state.connections.lock().push(peer.clone());
        if self.state.refused.lock().contains(&peer.host) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{peer} refused"),
            ));
        }
        let (client, server) = tokio::io::duplex(1 << 20);
        tokio::spawn(serve(server, Arc::clone(&self.state)));
        Ok(Box::new(client))
    }
}

async fn serve(stream: DuplexStream, state: Arc<MockState>) {
    let mut kill = state.kill.subscribe();
    let mut push = state.push.subscribe();
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    loop {
        let response = tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    return;
                };
                let Ok(request) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                state.log(&request);
                match request {
                    Value::Array(items) => {
                        let out: Vec<Value> = items.iter().filter_map(|r| state.answer(r)).collect();
                        if out.is_empty() {
                            continue;
                        }
                        Value::Array(out)
                    }
                    single => match state.answer(&single) {
                        Some(v) => v,
                        None => continue,
                    },
                }
            }
            note = push.recv() => match note {
                Ok(note) => note,
                Err(_) => continue,
            },
            _ = kill.changed() => return,
        };

        let mut bytes = serde_json::to_vec(&response).unwrap();
        bytes.push(b'\n');
        if write.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

/// Config with short backoffs so failure paths run quickly.
pub fn test_config(peers: Vec<Peer>) -> ElectrumConfig {
    ElectrumConfig {
        peers,
        handshake_attempts: 1,
        retry_backoff: Duration::from_millis(10),
        reconnect_delay: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        ..ElectrumConfig::default()
    }
}

pub fn peer(host: &str) -> Peer {
    Peer::new(host, 50001)
}

// ======================================================================
// In-memory chain index
// ======================================================================

#[derive(Default)]
struct MemoryState {
    history: HashMap<ScriptHash, Vec<HistoryEntry>>,
    unspent: HashMap<ScriptHash, Vec<UnspentEntry>>,
    raw: HashMap<Txid, Vec<u8>>,
}

/// In-memory chain index. Broadcasts of [`ToyTx`] or bitcoin transactions
/// are applied: inputs are spent, outputs become unspent entries.
#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<MemoryState>,
    counter: AtomicU64,
    pub history_calls: AtomicUsize,
    pub broadcasts: Mutex<Vec<String>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn synthetic_txid(&self) -> Txid {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Txid::from_raw_hash(sha256d::Hash::hash(&n.to_le_bytes()))
    }

    /// Record a history entry for `script` without funding it.
    pub fn mark_used(&self, script: &Script) -> Txid {
        let txid = self.synthetic_txid();
        self.state
            .lock()
            .history
            .entry(ScriptHash::from_script(script))
            .or_default()
            .push(HistoryEntry {
                tx_hash: txid,
                height: 100,
                fee: None,
            });
        txid
    }

    /// Fund `script` with an explicit-value output.
    pub fn fund(&self, script: &Script, value: u64) -> OutPoint {
        let txid = self.mark_used(script);
        self.state
            .lock()
            .unspent
            .entry(ScriptHash::from_script(script))
            .or_default()
            .push(UnspentEntry {
                tx_hash: txid,
                tx_pos: 0,
                value,
                height: 100,
            });
        OutPoint::new(txid, 0)
    }

    /// Apply a transaction: record it, spend its inputs, index its outputs.
    pub fn apply(&self, txid: Txid, raw: Vec<u8>, inputs: &[OutPoint], outputs: &[(ScriptBuf, u64)]) {
        let mut state = self.state.lock();
        for entries in state.unspent.values_mut() {
            entries.retain(|e| !inputs.contains(&e.outpoint()));
        }
        for (vout, (script, value)) in outputs.iter().enumerate() {
            if script.is_empty() {
                continue;
            }
            let sh = ScriptHash::from_script(script);
            let history = state.history.entry(sh).or_default();
            if !history.iter().any(|h| h.tx_hash == txid) {
                history.push(HistoryEntry {
                    tx_hash: txid,
                    height: 0,
                    fee: None,
                });
            }
            state.unspent.entry(sh).or_default().push(UnspentEntry {
                tx_hash: txid,
                tx_pos: vout as u32,
                value: *value,
                height: 0,
            });
        }
        state.raw.insert(txid, raw);
    }

    /// Apply a toy confidential transaction. Values of blinded outputs are
    /// reported as zero, the way confidential servers do.
    pub fn apply_toy(&self, tx: &ToyTx) -> Txid {
        let txid = tx.txid();
        let outputs: Vec<(ScriptBuf, u64)> = tx
            .outputs
            .iter()
            .map(|o| {
                let shown = if o.blinding_key.is_some() { 0 } else { o.value };
                (o.script_pubkey.clone(), shown)
            })
            .collect();
        self.apply(txid, tx.to_bytes(), &tx.inputs, &outputs);
        txid
    }

    pub fn unspent_count(&self) -> usize {
        self.state.lock().unspent.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ChainIndex for MemoryIndex {
    async fn get_history(&self, sh: &ScriptHash) -> Result<Vec<HistoryEntry>, ChainError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().history.get(sh).cloned().unwrap_or_default())
    }

    async fn multi_get_history(
        &self,
        hashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, Vec<HistoryEntry>>, ChainError> {
        let state = self.state.lock();
        Ok(hashes
            .iter()
            .filter_map(|h| state.history.get(h).map(|v| (*h, v.clone())))
            .collect())
    }

    async fn multi_get_balance(
        &self,
        hashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, Balance>, ChainError> {
        let state = self.state.lock();
        Ok(hashes
            .iter()
            .map(|h| {
                let mut balance = Balance::default();
                for e in state.unspent.get(h).into_iter().flatten() {
                    if e.height > 0 {
                        balance.confirmed += e.value as i64;
                    } else {
                        balance.unconfirmed += e.value as i64;
                    }
                }
                (*h, balance)
            })
            .collect())
    }

    async fn multi_list_unspent(
        &self,
        hashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, Vec<UnspentEntry>>, ChainError> {
        let state = self.state.lock();
        Ok(hashes
            .iter()
            .filter_map(|h| state.unspent.get(h).map(|v| (*h, v.clone())))
            .collect())
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, ChainError> {
        self.state
            .lock()
            .raw
            .get(txid)
            .cloned()
            .ok_or_else(|| ChainError::unexpected("blockchain.transaction.get", "unknown txid"))
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, ChainError> {
        let bad = |e: String| ChainError::unexpected("blockchain.transaction.broadcast", e);
        let raw = hex::decode(raw_tx_hex).map_err(|e| bad(e.to_string()))?;
        self.broadcasts.lock().push(raw_tx_hex.to_string());

        if let Ok(toy) = ToyTx::from_bytes(&raw) {
            return Ok(self.apply_toy(&toy).to_string());
        }
        let tx: Transaction = bitcoin::consensus::deserialize(&raw).map_err(|e| bad(e.to_string()))?;
        let txid = tx.compute_txid();
        let inputs: Vec<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
        let outputs: Vec<(ScriptBuf, u64)> = tx
            .output
            .iter()
            .map(|o| (o.script_pubkey.clone(), o.value.to_sat()))
            .collect();
        self.apply(txid, raw, &inputs, &outputs);
        Ok(txid.to_string())
    }
}

// ======================================================================
// Toy confidential transactions
// ======================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToyOutput {
    pub script_pubkey: ScriptBuf,
    pub asset: AssetId,
    pub value: u64,
    pub blinding_key: Option<PublicKey>,
}

/// Transparent serialization used in place of the confidential format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToyTx {
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<ToyOutput>,
    pub lock_time: u32,
}

impl ToyTx {
    pub fn from_pset(pset: &Pset) -> Self {
        Self {
            inputs: pset.inputs().iter().map(|i| i.outpoint).collect(),
            outputs: pset
                .outputs()
                .iter()
                .map(|o| ToyOutput {
                    script_pubkey: o.script_pubkey.clone(),
                    asset: o.asset,
                    value: o.value,
                    blinding_key: o.blinding_key,
                })
                .collect(),
            lock_time: pset.lock_time(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn txid(&self) -> Txid {
        Txid::from_raw_hash(sha256d::Hash::hash(&self.to_bytes()))
    }
}

fn asset_commitment(asset: &AssetId) -> Vec<u8> {
    let mut c = vec![0x0a];
    c.extend_from_slice(asset.as_bytes());
    c
}

fn value_commitment(value: u64) -> Vec<u8> {
    let mut c = vec![0x08];
    c.extend_from_slice(&value.to_le_bytes());
    c.resize(33, 0);
    c
}

/// Proof backend over [`ToyTx`]. "Commitments" carry values in the clear;
/// unblinding only succeeds with the key matching the output's blinding
/// pubkey, so blinding-key derivation is still checked.
#[derive(Debug, Default)]
pub struct FakeProofBackend {
    pub blind_last_calls: AtomicUsize,
    pub blind_non_last_calls: AtomicUsize,
}

impl FakeProofBackend {
    fn mark_blinded(pset: &mut Pset) -> Result<(), LiquidError> {
        for i in 0..pset.outputs().len() {
            let output = pset.output_mut(i)?;
            let Some(key) = output.blinding_key.filter(|_| output.blinded.is_none()) else {
                continue;
            };
            output.blinded = Some(BlindedOutput {
                asset_commitment: asset_commitment(&output.asset),
                value_commitment: value_commitment(output.value),
                nonce: key.serialize().to_vec(),
                rangeproof: vec![0xaa; 4],
                surjection_proof: vec![0xbb; 2],
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProofBackend for FakeProofBackend {
    async fn decode_transaction(&self, raw: &[u8]) -> Result<DecodedTransaction, LiquidError> {
        let tx = ToyTx::from_bytes(raw).map_err(|e| LiquidError::Backend(e.to_string()))?;
        let outputs = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(vout, o)| match o.blinding_key {
                Some(key) => TxOutputData {
                    vout: vout as u32,
                    script_pubkey: o.script_pubkey.clone(),
                    asset: AssetField::Confidential(asset_commitment(&o.asset)),
                    value: ValueField::Confidential(value_commitment(o.value)),
                    nonce: key.serialize().to_vec(),
                    rangeproof: vec![0xaa; 4],
                },
                None => TxOutputData {
                    vout: vout as u32,
                    script_pubkey: o.script_pubkey.clone(),
                    asset: AssetField::Explicit(o.asset),
                    value: ValueField::Explicit(o.value),
                    nonce: Vec::new(),
                    rangeproof: Vec::new(),
                },
            })
            .collect();
        Ok(DecodedTransaction {
            txid: tx.txid(),
            outputs,
        })
    }

    async fn unblind(
        &self,
        output: &TxOutputData,
        blinding_key: &SecretKey,
    ) -> Result<UnblindingData, LiquidError> {
        let expected = PublicKey::from_secret_key(&Secp256k1::signing_only(), blinding_key);
        if output.nonce != expected.serialize() {
            return Err(LiquidError::Blinding("nonce does not match blinding key".into()));
        }
        let (AssetField::Confidential(asset), ValueField::Confidential(value)) =
            (&output.asset, &output.value)
        else {
            return Err(LiquidError::Blinding("output is not confidential".into()));
        };
        let asset: [u8; 32] = asset[1..33]
            .try_into()
            .map_err(|_| LiquidError::Blinding("bad asset commitment".into()))?;
        let value: [u8; 8] = value[1..9]
            .try_into()
            .map_err(|_| LiquidError::Blinding("bad value commitment".into()))?;
        Ok(UnblindingData {
            value: u64::from_le_bytes(value),
            asset: AssetId::from_bytes(asset),
            asset_blinding_factor: [1; 32],
            value_blinding_factor: [2; 32],
        })
    }

    async fn blind_last(&self, pset: &mut Pset) -> Result<(), LiquidError> {
        self.blind_last_calls.fetch_add(1, Ordering::SeqCst);
        Self::mark_blinded(pset)
    }

    async fn blind_non_last(&self, pset: &mut Pset) -> Result<(), LiquidError> {
        self.blind_non_last_calls.fetch_add(1, Ordering::SeqCst);
        Self::mark_blinded(pset)
    }

    fn sighash(
        &self,
        pset: &Pset,
        input_index: usize,
        script_code: &Script,
    ) -> Result<[u8; 32], LiquidError> {
        let mut preimage = ToyTx::from_pset(pset).to_bytes();
        preimage.extend_from_slice(&(input_index as u64).to_le_bytes());
        preimage.extend_from_slice(script_code.as_bytes());
        Ok(sha256::Hash::hash(&preimage).to_byte_array())
    }

    async fn extract(&self, pset: &Pset) -> Result<ExtractedTransaction, LiquidError> {
        let tx = ToyTx::from_pset(pset);
        Ok(ExtractedTransaction {
            raw: tx.to_bytes(),
            txid: tx.txid(),
        })
    }
}

/// Poll `check` every 10ms for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
