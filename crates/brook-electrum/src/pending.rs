//! Table of in-flight requests awaiting a response.
//!
//! Each entry owns the one-shot sender that completes the caller's future.
//! A batch is registered once, under the highest id it contains, and records
//! its first id so response elements can be mapped back to request order.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use brook_core::error::RpcError;

/// One element of a batched response.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// Position of the originating request within the batch.
    pub index: usize,
    pub result: Value,
}

/// What a pending entry resolves with.
#[derive(Debug)]
pub enum Reply {
    Single(Value),
    Batch(Vec<BatchEntry>),
}

pub type ReplySender = oneshot::Sender<Result<Reply, RpcError>>;

/// A request (or batch) waiting on the wire.
#[derive(Debug)]
pub struct PendingSlot {
    pub method: String,
    /// Lowest id of the batch; equal to the key for single requests.
    pub first_id: u64,
    reply: ReplySender,
}

impl PendingSlot {
    pub fn new(method: impl Into<String>, first_id: u64, reply: ReplySender) -> Self {
        Self {
            method: method.into(),
            first_id,
            reply,
        }
    }

    /// Complete the waiting caller. A caller that already gave up is ignored.
    pub fn resolve(self, result: Result<Reply, RpcError>) {
        let _ = self.reply.send(result);
    }
}

#[derive(Debug, Default)]
pub struct PendingRequestTable {
    slots: HashMap<u64, PendingSlot>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `slot` under `id`. Ids are never reused, so an occupied key
    /// means the id counter was reset underneath us.
    pub fn insert(&mut self, id: u64, slot: PendingSlot) -> Result<(), RpcError> {
        if self.slots.contains_key(&id) {
            return Err(RpcError::Serialization(format!("request id {id} already pending")));
        }
        self.slots.insert(id, slot);
        Ok(())
    }

    pub fn take(&mut self, id: u64) -> Option<PendingSlot> {
        self.slots.remove(&id)
    }

    /// Drop an entry without resolving it (timeouts, failed writes).
    pub fn remove(&mut self, id: u64) -> bool {
        self.slots.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.slots.contains_key(&id)
    }

    /// Reject every pending entry with `err`. Returns how many were rejected.
    pub fn cancel_all(&mut self, err: &RpcError) -> usize {
        let n = self.slots.len();
        for (_, slot) in self.slots.drain() {
            slot.resolve(Err(err.clone()));
        }
        n
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
