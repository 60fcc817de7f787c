//! Block-height and block-time estimates from the last seen header.
//!
//! Heights and times are extrapolated with a fixed average block interval.
//! Before any header has been observed a hardcoded anchor is used.

use bitcoin::block::Header;
use serde::Deserialize;

use brook_core::constants::{AVG_BLOCK_INTERVAL_SECS, BLOCK_ANCHOR_HEIGHT, BLOCK_ANCHOR_TIME};

/// Payload of `blockchain.headers.subscribe` (response and notification).
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderNotification {
    pub height: u64,
    pub hex: String,
}

impl HeaderNotification {
    /// Header timestamp, decoded from the serialized header.
    pub fn timestamp(&self) -> Option<u64> {
        let bytes = hex::decode(&self.hex).ok()?;
        let header: Header = bitcoin::consensus::deserialize(&bytes).ok()?;
        Some(u64::from(header.time))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockClock {
    height: u64,
    time: u64,
    observed: bool,
}

impl Default for BlockClock {
    fn default() -> Self {
        Self {
            height: BLOCK_ANCHOR_HEIGHT,
            time: BLOCK_ANCHOR_TIME,
            observed: false,
        }
    }
}

impl BlockClock {
    /// Record a header. Older headers than the one already held are ignored.
    pub fn observe(&mut self, height: u64, time: u64) {
        if self.observed && height < self.height {
            return;
        }
        self.height = height;
        self.time = time;
        self.observed = true;
    }

    pub fn has_observed(&self) -> bool {
        self.observed
    }

    /// `(height, time)` of the reference block.
    pub fn latest(&self) -> (u64, u64) {
        (self.height, self.time)
    }

    /// Estimated chain tip at unix time `now`.
    pub fn estimate_current_height(&self, now: u64) -> u64 {
        self.height + now.saturating_sub(self.time) / AVG_BLOCK_INTERVAL_SECS
    }

    /// Estimated unix time at which `height` was (or will be) mined.
    pub fn calculate_block_time(&self, height: u64) -> i64 {
        let delta = height as i64 - self.height as i64;
        self.time as i64 + delta * AVG_BLOCK_INTERVAL_SECS as i64
    }

    /// Confirmations of a transaction mined at `tx_height`; 0 if unconfirmed.
    pub fn estimate_confirmations(&self, tx_height: i64, now: u64) -> u64 {
        if tx_height <= 0 {
            return 0;
        }
        let tip = self.estimate_current_height(now);
        (tip + 1).saturating_sub(tx_height as u64)
    }
}
