//! Inbound JSON frame decoder.
//!
//! Electrum servers do not agree on framing: most terminate every message
//! with a newline, some concatenate JSON values back to back, and large
//! responses arrive split over many reads. The decoder accumulates bytes
//! and stream-parses as many complete JSON values as the buffer holds.
//!
//! A trailing partial value is kept for the next read. A syntactically
//! broken value is kept too and retried on the next read; after
//! `max_failed_passes` consecutive failing passes, or once the buffer grows
//! past `max_buffer`, the data is declared corrupt and dropped.

use bytes::{Buf, BytesMut};
use serde_json::Value;

use brook_core::constants::{MAX_FAILED_PARSE_PASSES, MAX_FRAME_BUFFER};
use brook_core::error::RpcError;

/// Incremental decoder for newline-delimited or concatenated JSON values.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    failed_passes: u32,
    max_buffer: usize,
    max_failed_passes: u32,
}

impl FrameDecoder {
    pub fn new(max_buffer: usize, max_failed_passes: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            failed_passes: 0,
            max_buffer,
            max_failed_passes,
        }
    }

    /// Append `data` and return every complete JSON value now available.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Value>, RpcError> {
        self.buffer.extend_from_slice(data);

        let mut values = Vec::new();
        let mut consumed = 0usize;
        let mut failed = false;

        loop {
            let rest = &self.buffer[consumed..];
            let leading_ws = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
            consumed += leading_ws;
            if consumed >= self.buffer.len() {
                break;
            }

            let rest = &self.buffer[consumed..];
            let mut stream = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) => {
                    consumed += stream.byte_offset();
                    values.push(value);
                }
                // Incomplete frame; wait for the rest of it.
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(_)) => {
                    failed = true;
                    break;
                }
                None => break,
            }
        }

        self.buffer.advance(consumed);

        if failed {
            self.failed_passes += 1;
        } else {
            self.failed_passes = 0;
        }

        if self.failed_passes > self.max_failed_passes || self.buffer.len() > self.max_buffer {
            let err = RpcError::CorruptFrame {
                buffered: self.buffer.len(),
                passes: self.failed_passes,
            };
            self.reset();
            return Err(err);
        }

        Ok(values)
    }

    /// Bytes currently held waiting for more data.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consecutive passes that ended on a malformed value.
    pub fn failed_passes(&self) -> u32 {
        self.failed_passes
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.failed_passes = 0;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_BUFFER, MAX_FAILED_PARSE_PASSES)
    }
}
