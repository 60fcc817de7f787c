//! Bidirectional JSON-RPC client over a persistent byte stream.
//!
//! Requests are written as newline-terminated JSON. A background reader task
//! feeds inbound bytes through a [`FrameDecoder`] and routes each decoded
//! value to the pending entry with the matching id. Responses may arrive in
//! any order; each caller still receives exactly the response for its id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use brook_core::constants::{MAX_FAILED_PARSE_PASSES, MAX_FRAME_BUFFER, REQUEST_TIMEOUT};
use brook_core::error::RpcError;

use crate::framing::FrameDecoder;
use crate::pending::{BatchEntry, PendingRequestTable, PendingSlot, Reply};

const READ_CHUNK: usize = 16 * 1024;
const NOTIFICATION_CAPACITY: usize = 64;

/// A server-initiated message with no id (subscription push).
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// Tunables for one socket session.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub request_timeout: Duration,
    pub max_frame_buffer: usize,
    pub max_failed_passes: u32,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            max_frame_buffer: MAX_FRAME_BUFFER,
            max_failed_passes: MAX_FAILED_PARSE_PASSES,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State shared between the client handle and its reader task.
struct Shared {
    pending: Mutex<PendingRequestTable>,
    open: AtomicBool,
    closed_tx: watch::Sender<bool>,
    notifications: broadcast::Sender<Notification>,
}

impl Shared {
    /// Mark the session closed and reject everything still waiting.
    ///
    /// `open` flips under the pending lock, so no request can register
    /// after the table has been drained.
    fn shut(&self, err: &RpcError) {
        let mut pending = self.pending.lock();
        if self.open.swap(false, Ordering::SeqCst) {
            let cancelled = pending.cancel_all(err);
            debug!(cancelled, reason = %err, "rpc socket closed");
        }
        drop(pending);
        let _ = self.closed_tx.send(true);
    }

    /// Register a waiting caller, unless the session is already closed.
    fn register(&self, id: u64, slot: PendingSlot) -> Result<(), RpcError> {
        let mut pending = self.pending.lock();
        if !self.open.load(Ordering::SeqCst) {
            return Err(RpcError::NotConnected);
        }
        pending.insert(id, slot)
    }
}

pub struct SocketRpcClient {
    writer: tokio::sync::Mutex<BoxedWriter>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    request_timeout: Duration,
    closed_rx: watch::Receiver<bool>,
    last_call: Mutex<Option<Instant>>,
    reader: JoinHandle<()>,
}

impl SocketRpcClient {
    /// Take ownership of `stream` and start the reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(stream: S, options: SocketOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (closed_tx, closed_rx) = watch::channel(false);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingRequestTable::new()),
            open: AtomicBool::new(true),
            closed_tx,
            notifications,
        });

        let decoder = FrameDecoder::new(options.max_frame_buffer, options.max_failed_passes);
        let reader = tokio::spawn(read_loop(read_half, decoder, Arc::clone(&shared)));

        Self {
            writer: tokio::sync::Mutex::new(Box::new(write_half)),
            shared,
            next_id: AtomicU64::new(1),
            request_timeout: options.request_timeout,
            closed_rx,
            last_call: Mutex::new(None),
            reader,
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Watch channel that flips to `true` once the session ends.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    /// Resolves once the session has ended, for any reason.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifications.subscribe()
    }

    /// When the last request was sent.
    pub fn last_call(&self) -> Option<Instant> {
        *self.last_call.lock()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Send one request and wait for its response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if !self.is_open() {
            return Err(RpcError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.register(id, PendingSlot::new(method, id, tx))?;

        let frame = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        trace!(id, method, "rpc request");
        if let Err(e) = self.write_frame(&frame).await {
            self.shared.pending.lock().remove(id);
            return Err(e);
        }

        match self.await_reply(id, method, rx).await? {
            Reply::Single(value) => Ok(value),
            Reply::Batch(_) => Err(RpcError::Serialization(format!(
                "batch response to single request {id}"
            ))),
        }
    }

    /// Send `params_list.len()` calls of `method` as one batch.
    ///
    /// Elements the server answered with an error are left out; each
    /// returned entry carries the index of its originating request.
    pub async fn request_batch(
        &self,
        method: &str,
        params_list: Vec<Value>,
    ) -> Result<Vec<BatchEntry>, RpcError> {
        if params_list.is_empty() {
            return Ok(Vec::new());
        }
        if !self.is_open() {
            return Err(RpcError::NotConnected);
        }

        let count = params_list.len() as u64;
        let first_id = self.next_id.fetch_add(count, Ordering::SeqCst);
        let last_id = first_id + count - 1;

        let (tx, rx) = oneshot::channel();
        self.shared
            .register(last_id, PendingSlot::new(method, first_id, tx))?;

        let frame = Value::Array(
            params_list
                .into_iter()
                .zip(first_id..)
                .map(|(params, id)| {
                    json!({
                        "jsonrpc": "2.0",
                        "method": method,
                        "params": params,
                        "id": id,
                    })
                })
                .collect(),
        );
        trace!(first_id, last_id, method, "rpc batch request");
        if let Err(e) = self.write_frame(&frame).await {
            self.shared.pending.lock().remove(last_id);
            return Err(e);
        }

        match self.await_reply(last_id, method, rx).await? {
            Reply::Batch(mut entries) => {
                entries.sort_by_key(|e| e.index);
                Ok(entries)
            }
            Reply::Single(_) => Err(RpcError::Serialization(format!(
                "single response to batch {first_id}..={last_id}"
            ))),
        }
    }

    /// Close the session now. Every pending request fails with `Cancelled`.
    pub async fn close(&self) {
        self.shared.shut(&RpcError::Cancelled("connection closed locally".into()));
        self.reader.abort();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    async fn write_frame(&self, frame: &Value) -> Result<(), RpcError> {
        let mut line =
            serde_json::to_vec(frame).map_err(|e| RpcError::Serialization(e.to_string()))?;
        line.push(b'\n');

        *self.last_call.lock() = Some(Instant::now());

        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;
        drop(writer);

        written.map_err(|e| {
            let err = RpcError::Transport(e.to_string());
            self.shared.shut(&err);
            err
        })
    }

    async fn await_reply(
        &self,
        id: u64,
        method: &str,
        rx: oneshot::Receiver<Result<Reply, RpcError>>,
    ) -> Result<Reply, RpcError> {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Cancelled(format!("request {id} dropped"))),
            Err(_) => {
                self.shared.pending.lock().remove(id);
                debug!(id, method, "rpc request timed out");
                Err(RpcError::RequestTimeout {
                    method: method.to_owned(),
                    id,
                })
            }
        }
    }
}

impl Drop for SocketRpcClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.shared.shut(&RpcError::Cancelled("client dropped".into()));
    }
}

async fn read_loop<R>(mut reader: R, mut decoder: FrameDecoder, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let reason = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break RpcError::Cancelled("connection closed by peer".into()),
            Ok(n) => match decoder.push(&buf[..n]) {
                Ok(values) => {
                    for value in values {
                        dispatch(&shared, value);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "rpc socket: dropping corrupt stream");
                    break e;
                }
            },
            Err(e) => break RpcError::Transport(e.to_string()),
        }
    };
    shared.shut(&reason);
}

/// Route one decoded value to its waiting caller.
fn dispatch(shared: &Shared, value: Value) {
    match value {
        Value::Array(elements) => dispatch_batch(shared, elements),
        Value::Object(ref obj) => {
            let Some(id) = obj.get("id").and_then(Value::as_u64) else {
                if let Some(method) = obj.get("method").and_then(Value::as_str) {
                    let note = Notification {
                        method: method.to_owned(),
                        params: obj.get("params").cloned().unwrap_or(Value::Null),
                    };
                    trace!(method = %note.method, "rpc notification");
                    let _ = shared.notifications.send(note);
                } else {
                    debug!(%value, "rpc response without id");
                }
                return;
            };

            let Some(slot) = shared.pending.lock().take(id) else {
                debug!(id, "rpc response for unknown id");
                return;
            };

            let result = match obj.get("error") {
                Some(err) if !err.is_null() => Err(RpcError::from_error_value(err)),
                _ => Ok(Reply::Single(obj.get("result").cloned().unwrap_or(Value::Null))),
            };
            slot.resolve(result);
        }
        other => debug!(value = %other, "rpc: ignoring non-object frame"),
    }
}

fn dispatch_batch(shared: &Shared, elements: Vec<Value>) {
    let Some(max_id) = elements
        .iter()
        .filter_map(|e| e.get("id").and_then(Value::as_u64))
        .max()
    else {
        debug!("rpc batch response without ids");
        return;
    };

    let Some(slot) = shared.pending.lock().take(max_id) else {
        debug!(max_id, "stale batch response");
        return;
    };

    let first_id = slot.first_id;
    let entries = elements
        .into_iter()
        .filter(|e| e.get("error").is_none_or(Value::is_null))
        .filter_map(|mut e| {
            let id = e.get("id").and_then(Value::as_u64)?;
            let index = usize::try_from(id.checked_sub(first_id)?).ok()?;
            let result = e.get_mut("result").map(Value::take).unwrap_or(Value::Null);
            Some(BatchEntry { index, result })
        })
        .collect();
    slot.resolve(Ok(Reply::Batch(entries)));
}
