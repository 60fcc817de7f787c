//! Electrum chain-index client.
//!
//! [`ElectrumClient`] is a cheap-to-clone handle over one session: at most
//! one live socket, a peer rotation, detected server capabilities, and the
//! block clock. Dropping every handle tears the session down.
//!
//! Connection lifecycle: `Idle -> Connecting -> Connected`, or
//! `Connecting -> Failed(n)` after `n` failed handshakes. A confirmed
//! connection that drops is re-established once by a supervisor task after
//! `reconnect_delay`, unless it was closed with [`ElectrumClient::force_disconnect`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Address, Network, Txid};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use brook_core::constants::{FAST_TARGET_BLOCKS, MEDIUM_TARGET_BLOCKS, SLOW_TARGET_BLOCKS};
use brook_core::error::{ChainError, RpcError};
use brook_core::traits::ChainIndex;
use brook_core::types::{Balance, HistoryEntry, Peer, ScriptHash, UnspentEntry};

use crate::blockclock::{BlockClock, HeaderNotification};
use crate::capability;
use crate::config::ElectrumConfig;
use crate::connector::{Connector, TcpConnector};
use crate::decode;
use crate::fees::{self, FeeEstimates, FeeHistogram};
use crate::peers::PeerRotation;
use crate::socket::SocketRpcClient;
use crate::types::{ConnectionState, ConnectionStatus, VerboseTransaction};

const METHOD_VERSION: &str = "server.version";
const METHOD_PING: &str = "server.ping";
const METHOD_HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
const METHOD_ESTIMATE_FEE: &str = "blockchain.estimatefee";
const METHOD_FEE_HISTOGRAM: &str = "mempool.get_fee_histogram";
const METHOD_RELAY_FEE: &str = "blockchain.relayfee";
const METHOD_GET_BALANCE: &str = "blockchain.scripthash.get_balance";
const METHOD_GET_HISTORY: &str = "blockchain.scripthash.get_history";
const METHOD_LIST_UNSPENT: &str = "blockchain.scripthash.listunspent";
const METHOD_TX_GET: &str = "blockchain.transaction.get";
const METHOD_TX_BROADCAST: &str = "blockchain.transaction.broadcast";

#[derive(Clone)]
pub struct ElectrumClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ElectrumConfig,
    connector: Arc<dyn Connector>,
    rpc: RwLock<Option<Arc<SocketRpcClient>>>,
    session: Mutex<Session>,
    peers: Mutex<PeerRotation>,
    clock: Mutex<BlockClock>,
    connect_lock: tokio::sync::Mutex<()>,
    status: watch::Sender<ConnectionStatus>,
}

/// Facts learned about the current (or last) server.
#[derive(Debug, Default)]
struct Session {
    server_name: Option<String>,
    peer: Option<Peer>,
    batching: bool,
    verbose_unsupported: bool,
    forced: bool,
}

impl ElectrumClient {
    pub fn new(config: ElectrumConfig, connector: Arc<dyn Connector>) -> Self {
        let peers = PeerRotation::new(config.peers.clone(), config.saved_peer.clone());
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                rpc: RwLock::new(None),
                session: Mutex::new(Session::default()),
                peers: Mutex::new(peers),
                clock: Mutex::new(BlockClock::default()),
                connect_lock: tokio::sync::Mutex::new(()),
                status,
            }),
        }
    }

    /// Client over plain TCP.
    pub fn with_tcp(config: ElectrumConfig) -> Self {
        Self::new(config, Arc::new(TcpConnector))
    }

    pub fn config(&self) -> &ElectrumConfig {
        &self.inner.config
    }

    // --- Connection lifecycle ---

    /// Connect to the first peer that completes a handshake.
    ///
    /// Makes up to `max(handshake_attempts, peers)` attempts with
    /// `retry_backoff` between them. A no-op if already connected.
    pub async fn connect(&self) -> Result<(), ChainError> {
        self.inner.session.lock().forced = false;
        if let Some(closed) = self.establish().await? {
            tokio::spawn(supervise(Arc::downgrade(&self.inner), closed));
        }
        Ok(())
    }

    /// Close the socket now and stay disconnected.
    ///
    /// Every pending request fails immediately with `Cancelled`.
    pub async fn force_disconnect(&self) {
        self.inner.session.lock().forced = true;
        let rpc = self.inner.rpc.write().take();
        self.set_status(ConnectionStatus::Idle);
        if let Some(rpc) = rpc {
            rpc.close().await;
            info!("electrum: disconnected");
        }
    }

    /// Wait up to `timeout` for the session to reach `Connected`.
    pub async fn wait_till_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.status.subscribe();
        let reached = tokio::time::timeout(timeout, async {
            loop {
                if *rx.borrow_and_update() == ConnectionStatus::Connected {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;
        matches!(reached, Ok(true))
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
            && self.inner.rpc.read().as_ref().is_some_and(|rpc| rpc.is_open())
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn server_name(&self) -> Option<String> {
        self.inner.session.lock().server_name.clone()
    }

    pub fn batching_enabled(&self) -> bool {
        self.inner.session.lock().batching
    }

    pub fn connection_state(&self) -> ConnectionState {
        let last_call = self.inner.rpc.read().as_ref().and_then(|rpc| rpc.last_call());
        let session = self.inner.session.lock();
        ConnectionState {
            status: self.status(),
            server_name: session.server_name.clone(),
            peer: session.peer.clone(),
            batching: session.batching,
            verbose_unsupported: session.verbose_unsupported,
            last_call,
        }
    }

    /// Run the handshake loop. `None` means another caller already holds a
    /// live connection.
    async fn establish(&self) -> Result<Option<watch::Receiver<bool>>, ChainError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(None);
        }

        let attempts = self.inner.config.effective_attempts();
        self.inner.peers.lock().restart();
        self.set_status(ConnectionStatus::Connecting);

        let mut last_error = String::from("no peers configured");
        let mut tried = 0;
        for attempt in 1..=attempts {
            let next = self.inner.peers.lock().next_peer();
            let Some(peer) = next else {
                break;
            };
            tried = attempt;
            debug!(%peer, attempt, "electrum: connecting");
            match self.handshake(&peer).await {
                Ok(closed) => return Ok(Some(closed)),
                Err(e) => {
                    warn!(%peer, attempt, error = %e, "electrum: handshake failed");
                    last_error = e.to_string();
                    self.set_status(ConnectionStatus::Failed(attempt));
                    if attempt < attempts {
                        tokio::time::sleep(self.inner.config.retry_backoff).await;
                    }
                }
            }
        }

        self.set_status(ConnectionStatus::Failed(tried));
        Err(ChainError::Connection {
            attempts: tried,
            last_error,
        })
    }

    async fn handshake(&self, peer: &Peer) -> Result<watch::Receiver<bool>, ChainError> {
        let cfg = &self.inner.config;
        let stream = tokio::time::timeout(cfg.connect_timeout, self.inner.connector.connect(peer))
            .await
            .map_err(|_| RpcError::Transport(format!("connect to {peer} timed out")))?
            .map_err(|e| RpcError::Transport(format!("connect to {peer}: {e}")))?;

        let rpc = Arc::new(SocketRpcClient::spawn(stream, cfg.socket_options()));
        let banner = rpc
            .request(
                METHOD_VERSION,
                json!([cfg.client_name, cfg.protocol_version]),
            )
            .await?;
        let server_name = parse_server_banner(&banner)?;
        let batching = capability::batching_supported(&server_name);
        info!(%peer, server = %server_name, batching, "electrum: connected");

        {
            let mut session = self.inner.session.lock();
            session.server_name = Some(server_name);
            session.peer = Some(peer.clone());
            session.batching = batching;
            session.verbose_unsupported = false;
        }

        let closed = rpc.close_signal();
        spawn_header_listener(Arc::downgrade(&self.inner), rpc.subscribe_notifications());
        *self.inner.rpc.write() = Some(Arc::clone(&rpc));
        self.set_status(ConnectionStatus::Connected);

        match rpc.request(METHOD_HEADERS_SUBSCRIBE, json!([])).await {
            Ok(header) => record_header(&self.inner.clock, &header),
            Err(e) => warn!(error = %e, "electrum: header subscription failed"),
        }

        Ok(closed)
    }

    /// Bookkeeping after the socket closed. Returns whether to reconnect.
    fn on_connection_lost(&self) -> bool {
        {
            let mut slot = self.inner.rpc.write();
            if slot.as_ref().is_some_and(|rpc| rpc.is_open()) {
                // Already replaced by a newer connection.
                return false;
            }
            *slot = None;
        }
        let was_connected = self.status() == ConnectionStatus::Connected;
        self.set_status(ConnectionStatus::Idle);
        let forced = self.inner.session.lock().forced;
        if forced {
            debug!("electrum: connection closed locally");
        } else {
            warn!(was_connected, "electrum: connection lost");
        }
        was_connected && !forced
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.inner.status.send_replace(status);
    }

    fn rpc(&self) -> Result<Arc<SocketRpcClient>, RpcError> {
        match self.inner.rpc.read().as_ref() {
            Some(rpc) if rpc.is_open() => Ok(Arc::clone(rpc)),
            _ => Err(RpcError::NotConnected),
        }
    }

    // --- Calls ---

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let rpc = self.rpc()?;
        let value = rpc.request(method, params).await?;
        decode_value(method, value)
    }

    /// Issue `method` once per params entry, batched when the server allows.
    ///
    /// Returns `(index, result)` for every call that produced data, in index
    /// order. Elements the server answered with an error are absent.
    async fn multi_request(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Vec<(usize, Value)>, ChainError> {
        let rpc = self.rpc()?;
        let batching = self.batching_enabled();
        let chunk_size = self.inner.config.batch_chunk_size.max(1);

        let mut out = Vec::with_capacity(params.len());
        let mut offset = 0;
        for chunk in params.chunks(chunk_size) {
            if batching {
                for entry in rpc.request_batch(method, chunk.to_vec()).await? {
                    out.push((offset + entry.index, entry.result));
                }
            } else {
                let mut calls = JoinSet::new();
                for (i, p) in chunk.iter().cloned().enumerate() {
                    let rpc = Arc::clone(&rpc);
                    let method = method.to_owned();
                    calls.spawn(async move { (offset + i, rpc.request(&method, p).await) });
                }
                while let Some(joined) = calls.join_next().await {
                    let (index, result) =
                        joined.map_err(|e| RpcError::Cancelled(format!("{method}: {e}")))?;
                    match result {
                        Ok(value) => out.push((index, value)),
                        Err(RpcError::Protocol { code, message }) => {
                            debug!(method, index, code, %message, "electrum: no data for element");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            offset += chunk.len();
        }
        out.sort_by_key(|(i, _)| *i);
        Ok(out)
    }

    async fn multi_scripthash<T: DeserializeOwned>(
        &self,
        method: &str,
        scripthashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, T>, ChainError> {
        let params = scripthashes.iter().map(|sh| json!([sh.to_hex()])).collect();
        let mut out = HashMap::with_capacity(scripthashes.len());
        for (index, value) in self.multi_request(method, params).await? {
            if let Some(sh) = scripthashes.get(index) {
                out.insert(*sh, decode_value(method, value)?);
            }
        }
        Ok(out)
    }

    pub async fn ping(&self) -> Result<(), ChainError> {
        let _: Value = self.call(METHOD_PING, json!([])).await?;
        Ok(())
    }

    pub async fn get_balance(&self, scripthash: &ScriptHash) -> Result<Balance, ChainError> {
        self.call(METHOD_GET_BALANCE, json!([scripthash.to_hex()])).await
    }

    pub async fn list_unspent(&self, scripthash: &ScriptHash) -> Result<Vec<UnspentEntry>, ChainError> {
        self.call(METHOD_LIST_UNSPENT, json!([scripthash.to_hex()])).await
    }

    /// Balance of an address on the configured network.
    pub async fn get_balance_by_address(&self, address: &str) -> Result<Balance, ChainError> {
        let sh = scripthash_for_address(address, self.inner.config.network)?;
        self.get_balance(&sh).await
    }

    pub async fn get_history_by_address(&self, address: &str) -> Result<Vec<HistoryEntry>, ChainError> {
        let sh = scripthash_for_address(address, self.inner.config.network)?;
        self.get_history(&sh).await
    }

    pub async fn list_unspent_by_address(&self, address: &str) -> Result<Vec<UnspentEntry>, ChainError> {
        let sh = scripthash_for_address(address, self.inner.config.network)?;
        self.list_unspent(&sh).await
    }

    pub async fn get_raw_transaction_hex(&self, txid: &Txid) -> Result<String, ChainError> {
        self.call(METHOD_TX_GET, json!([txid.to_string()])).await
    }

    /// Verbose transaction, decoded locally if the server refuses verbose output.
    pub async fn get_transaction(&self, txid: &Txid) -> Result<VerboseTransaction, ChainError> {
        let verbose_ok = !self.inner.session.lock().verbose_unsupported;
        if verbose_ok {
            let rpc = self.rpc()?;
            match rpc.request(METHOD_TX_GET, json!([txid.to_string(), true])).await {
                Ok(value) => return self.verbose_from_value(value),
                Err(e) if capability::is_verbose_unsupported(&e) => self.mark_verbose_unsupported(),
                Err(e) => return Err(e.into()),
            }
        }
        let raw = self.get_raw_transaction_hex(txid).await?;
        decode::decode_transaction(&raw, self.inner.config.network)
    }

    /// Verbose transactions for many txids. Txids the server has no data
    /// for are absent.
    pub async fn multi_get_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<HashMap<Txid, VerboseTransaction>, ChainError> {
        let mut out = HashMap::with_capacity(txids.len());

        let verbose_ok = !self.inner.session.lock().verbose_unsupported;
        if verbose_ok {
            let params = txids.iter().map(|t| json!([t.to_string(), true])).collect();
            for (index, value) in self.multi_request(METHOD_TX_GET, params).await? {
                if let Some(txid) = txids.get(index) {
                    out.insert(*txid, self.verbose_from_value(value)?);
                }
            }
        }

        let missing: Vec<Txid> = txids
            .iter()
            .filter(|t| !out.contains_key(*t))
            .copied()
            .collect();
        if missing.is_empty() {
            return Ok(out);
        }
        debug!(count = missing.len(), "electrum: fetching raw transactions for local decode");

        let params = missing.iter().map(|t| json!([t.to_string()])).collect();
        for (index, value) in self.multi_request(METHOD_TX_GET, params).await? {
            let Some(txid) = missing.get(index) else {
                continue;
            };
            let raw: String = decode_value(METHOD_TX_GET, value)?;
            out.insert(*txid, decode::decode_transaction(&raw, self.inner.config.network)?);
        }
        Ok(out)
    }

    fn verbose_from_value(&self, value: Value) -> Result<VerboseTransaction, ChainError> {
        match value {
            // Some servers ignore the verbose flag and send hex anyway.
            Value::String(raw) => decode::decode_transaction(&raw, self.inner.config.network),
            other => decode_value(METHOD_TX_GET, other),
        }
    }

    fn mark_verbose_unsupported(&self) {
        let mut session = self.inner.session.lock();
        if !session.verbose_unsupported {
            info!(server = ?session.server_name, "electrum: verbose transactions unsupported, decoding locally");
            session.verbose_unsupported = true;
        }
    }

    // --- Fees ---

    /// Historical fee estimate for confirmation within `blocks`, sat/vB.
    pub async fn estimate_fee(&self, blocks: u32) -> Result<u64, ChainError> {
        let btc_per_kb: f64 = self.call(METHOD_ESTIMATE_FEE, json!([blocks])).await?;
        Ok(fees::btc_per_kb_to_sat_per_vbyte(btc_per_kb))
    }

    /// Minimum relay fee, sat/kvB.
    pub async fn relay_fee(&self) -> Result<u64, ChainError> {
        let btc_per_kb: f64 = self.call(METHOD_RELAY_FEE, json!([])).await?;
        Ok(fees::btc_per_kb_to_sat_per_kvb(btc_per_kb))
    }

    /// Mempool fee histogram, or `None` if the server does not provide one.
    pub async fn fee_histogram(&self) -> Result<Option<FeeHistogram>, ChainError> {
        let rpc = self.rpc()?;
        match rpc.request(METHOD_FEE_HISTOGRAM, json!([])).await {
            Ok(value) => Ok(Some(decode_value(METHOD_FEE_HISTOGRAM, value)?)),
            Err(e @ RpcError::Protocol { .. }) => {
                debug!(error = %e, "electrum: fee histogram unavailable");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fast/medium/slow fee rates, blending the histogram with history.
    pub async fn estimate_fees(&self) -> Result<FeeEstimates, ChainError> {
        let histogram = self.fee_histogram().await?;
        let historical = FeeEstimates {
            fast: self.estimate_fee(FAST_TARGET_BLOCKS).await?,
            medium: self.estimate_fee(MEDIUM_TARGET_BLOCKS).await?,
            slow: self.estimate_fee(SLOW_TARGET_BLOCKS).await?,
        };
        let blended = fees::blend(histogram.as_deref(), historical);
        if blended == historical {
            debug!(?historical, "electrum: using historical fee estimates");
        }
        Ok(blended)
    }

    // --- Block clock ---

    pub fn estimate_current_height(&self) -> u64 {
        self.inner.clock.lock().estimate_current_height(now_unix())
    }

    pub fn calculate_block_time(&self, height: u64) -> i64 {
        self.inner.clock.lock().calculate_block_time(height)
    }

    pub fn estimate_confirmations(&self, tx_height: i64) -> u64 {
        self.inner.clock.lock().estimate_confirmations(tx_height, now_unix())
    }

    pub fn block_clock(&self) -> BlockClock {
        *self.inner.clock.lock()
    }
}

#[async_trait]
impl ChainIndex for ElectrumClient {
    async fn get_history(&self, scripthash: &ScriptHash) -> Result<Vec<HistoryEntry>, ChainError> {
        self.call(METHOD_GET_HISTORY, json!([scripthash.to_hex()])).await
    }

    async fn multi_get_history(
        &self,
        scripthashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, Vec<HistoryEntry>>, ChainError> {
        self.multi_scripthash(METHOD_GET_HISTORY, scripthashes).await
    }

    async fn multi_get_balance(
        &self,
        scripthashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, Balance>, ChainError> {
        self.multi_scripthash(METHOD_GET_BALANCE, scripthashes).await
    }

    async fn multi_list_unspent(
        &self,
        scripthashes: &[ScriptHash],
    ) -> Result<HashMap<ScriptHash, Vec<UnspentEntry>>, ChainError> {
        self.multi_scripthash(METHOD_LIST_UNSPENT, scripthashes).await
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, ChainError> {
        let raw = self.get_raw_transaction_hex(txid).await?;
        hex::decode(raw.trim()).map_err(|e| ChainError::unexpected(METHOD_TX_GET, e.to_string()))
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, ChainError> {
        let txid: String = self.call(METHOD_TX_BROADCAST, json!([raw_tx_hex])).await?;
        info!(%txid, "electrum: broadcast accepted");
        Ok(txid)
    }
}

/// Reconnect loop for one session. Exits when the client is gone, the
/// close was forced, or a reconnect attempt fails.
async fn supervise(inner: Weak<Inner>, mut closed: watch::Receiver<bool>) {
    loop {
        wait_closed(&mut closed).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let client = ElectrumClient { inner };
        if !client.on_connection_lost() {
            return;
        }

        tokio::time::sleep(client.inner.config.reconnect_delay).await;
        info!("electrum: reconnecting");
        match client.establish().await {
            Ok(Some(next)) => closed = next,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "electrum: reconnect failed");
                return;
            }
        }
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Keep the block clock current from header notifications.
fn spawn_header_listener(inner: Weak<Inner>, mut notes: broadcast::Receiver<crate::socket::Notification>) {
    tokio::spawn(async move {
        loop {
            match notes.recv().await {
                Ok(note) if note.method == METHOD_HEADERS_SUBSCRIBE => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    if let Some(header) = note.params.get(0) {
                        record_header(&inner.clock, header);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "electrum: header listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

fn record_header(clock: &Mutex<BlockClock>, header: &Value) {
    let parsed = serde_json::from_value::<HeaderNotification>(header.clone())
        .ok()
        .and_then(|h| h.timestamp().map(|time| (h.height, time)));
    match parsed {
        Some((height, time)) => {
            clock.lock().observe(height, time);
            debug!(height, time, "electrum: new block header");
        }
        None => debug!(%header, "electrum: unparseable header"),
    }
}

/// Software name from a `server.version` result (`[software, protocol]`).
fn parse_server_banner(value: &Value) -> Result<String, ChainError> {
    let software = match value {
        Value::Array(items) => items.first().and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    };
    software
        .map(str::to_owned)
        .ok_or_else(|| ChainError::unexpected(METHOD_VERSION, value.to_string()))
}

fn decode_value<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, ChainError> {
    serde_json::from_value(value).map_err(|e| ChainError::unexpected(method, e.to_string()))
}

fn now_unix() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Electrum scripthash for an address string on `network`.
pub fn scripthash_for_address(address: &str, network: Network) -> Result<ScriptHash, ChainError> {
    let parsed = Address::from_str(address)
        .map_err(|e| ChainError::InvalidAddress(format!("{address}: {e}")))?
        .require_network(network)
        .map_err(|e| ChainError::InvalidAddress(format!("{address}: {e}")))?;
    Ok(ScriptHash::from_script(&parsed.script_pubkey()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_parsing() {
        assert_eq!(
            parse_server_banner(&json!(["Fulcrum 1.9.1", "1.4"])).unwrap(),
            "Fulcrum 1.9.1"
        );
        assert_eq!(parse_server_banner(&json!("electrs/0.9.0")).unwrap(), "electrs/0.9.0");
        assert!(parse_server_banner(&json!({"x": 1})).is_err());
    }

    #[test]
    fn scripthash_for_p2pkh_address() {
        let sh = scripthash_for_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Network::Bitcoin).unwrap();
        assert_eq!(
            sh.to_hex(),
            "8b01df4e368ea28f8dc0423bcf7a4923e3a12d307c875e47a0cfbf90b5c39161"
        );
    }

    #[test]
    fn scripthash_rejects_wrong_network() {
        let err = scripthash_for_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Network::Testnet)
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidAddress(_)));
        assert!(scripthash_for_address("not-an-address", Network::Bitcoin).is_err());
    }

    #[tokio::test]
    async fn calls_before_connect_fail_fast() {
        let client = ElectrumClient::with_tcp(ElectrumConfig::default());
        assert_eq!(client.status(), ConnectionStatus::Idle);
        assert!(!client.is_connected());
        assert_eq!(
            client.ping().await.unwrap_err(),
            ChainError::Rpc(RpcError::NotConnected)
        );
        assert!(matches!(
            client.multi_get_history(&[]).await,
            Err(ChainError::Rpc(RpcError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn connect_without_peers_fails() {
        let client = ElectrumClient::with_tcp(ElectrumConfig::default());
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ChainError::Connection { attempts: 0, .. }));
        assert_eq!(client.status(), ConnectionStatus::Failed(0));
    }

    #[test]
    fn block_clock_defaults_to_anchor() {
        let client = ElectrumClient::with_tcp(ElectrumConfig::default());
        assert!(!client.block_clock().has_observed());
        assert!(client.estimate_current_height() > brook_core::constants::BLOCK_ANCHOR_HEIGHT);
    }
}
