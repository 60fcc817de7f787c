//! Protocol constants for Brook.
//!
//! Timeouts, retry policy, fee heuristics, and transaction-size estimates
//! used across the socket client, the chain-index client and the wallet
//! layers.

use std::time::Duration;

use crate::types::AssetId;

// --- Socket client ---

/// Default timeout for a single JSON-RPC request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing a socket connection to a peer.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(9);

/// Upper bound on bytes held by the frame decoder while waiting for a
/// complete JSON value.
pub const MAX_FRAME_BUFFER: usize = 16 * 1024 * 1024;

/// Consecutive decode passes that may fail to make progress before the
/// buffered data is declared corrupt.
pub const MAX_FAILED_PARSE_PASSES: u32 = 32;

// --- Chain index client ---

/// Handshake attempts made by `connect()` before giving up.
pub const HANDSHAKE_ATTEMPTS: u32 = 5;

/// Pause between handshake attempts.
pub const HANDSHAKE_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Delay before reconnecting after a confirmed connection drops.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Maximum number of requests packed into one batch.
pub const BATCH_CHUNK_SIZE: usize = 100;

/// Electrum protocol version requested during the handshake.
pub const ELECTRUM_PROTOCOL_VERSION: &str = "1.4";

/// Client name sent with `server.version`.
pub const CLIENT_NAME: &str = "brook";

/// Average block interval used by the block clock, in seconds (9.93 min).
pub const AVG_BLOCK_INTERVAL_SECS: u64 = 596;

/// Anchor height used by the block clock before any header is seen.
pub const BLOCK_ANCHOR_HEIGHT: u64 = 624_083;

/// Timestamp of [`BLOCK_ANCHOR_HEIGHT`].
pub const BLOCK_ANCHOR_TIME: u64 = 1_585_837_504;

// --- Fee estimation ---

/// If the first histogram bucket's fee rate exceeds this, the histogram is
/// distrusted and the historical estimates are used outright.
pub const FEE_HISTOGRAM_SANITY_LIMIT: f64 = 1000.0;

/// Virtual bytes in one block, for histogram accumulation.
pub const VBYTES_PER_BLOCK: u64 = 1_000_000;

/// Granularity used when flattening the histogram for the percentile.
pub const HISTOGRAM_FLATTEN_STEP: u64 = 25_000;

/// Floor for the histogram-derived fast fee rate (sat/vB).
pub const MIN_FAST_FEE_RATE: u64 = 2;

/// Floor for derived medium/slow fee rates (sat/vB).
pub const MIN_FEE_RATE: u64 = 1;

/// Block targets for the historical `blockchain.estimatefee` calls.
pub const FAST_TARGET_BLOCKS: u32 = 1;
pub const MEDIUM_TARGET_BLOCKS: u32 = 18;
pub const SLOW_TARGET_BLOCKS: u32 = 144;

// --- HD wallet ---

/// Consecutive addresses scanned past the frontier.
pub const DEFAULT_GAP_LIMIT: u32 = 20;

// --- Transaction size model (legacy-size defaults of the selector) ---

/// version + input count + output count + locktime.
pub const TX_EMPTY_SIZE: u64 = 4 + 1 + 1 + 4;

/// outpoint + sequence + script length byte.
pub const TX_INPUT_BASE: u64 = 32 + 4 + 1 + 4;

/// Default scriptSig length assumed for an input (legacy p2pkh).
pub const TX_INPUT_PUBKEYHASH: u64 = 107;

/// value + script length byte.
pub const TX_OUTPUT_BASE: u64 = 8 + 1;

/// Default scriptPubKey length assumed for an output (p2pkh).
pub const TX_OUTPUT_PUBKEYHASH: u64 = 25;

/// Script-length estimate for a native segwit (p2wpkh) input.
pub const NATIVE_SEGWIT_INPUT_SCRIPT_LEN: u64 = 27;

/// Script-length estimate for a nested segwit (p2sh-p2wpkh) input.
pub const NESTED_SEGWIT_INPUT_SCRIPT_LEN: u64 = 50;

/// Bytes added to a decoded bech32 output script for the size estimate.
pub const BECH32_OUTPUT_SCRIPT_OVERHEAD: u64 = 3;

// --- Confidential chain ---

/// BIP44 coin type registered for Liquid.
pub const LIQUID_COIN_TYPE: u32 = 1776;

/// Policy asset (L-BTC) on Liquid mainnet, display byte order.
pub const LIQUID_POLICY_ASSET_HEX: &str =
    "6f0279e9ed041c3d710a9f57d0c02928416460c4b722ae3457a11eec381c526d";

pub const LIQUID_POLICY_ASSET: AssetId = AssetId::from_bytes([
    0x6f, 0x02, 0x79, 0xe9, 0xed, 0x04, 0x1c, 0x3d, 0x71, 0x0a, 0x9f, 0x57, 0xd0, 0xc0, 0x29, 0x28,
    0x41, 0x64, 0x60, 0xc4, 0xb7, 0x22, 0xae, 0x34, 0x57, 0xa1, 0x1e, 0xec, 0x38, 0x1c, 0x52, 0x6d,
]);

/// Default minimum relay fee on Liquid, sat/kvB.
pub const LIQUID_DEFAULT_RELAY_FEE: u64 = 100;

/// Provisional fees are inflated by this ratio (11/10).
pub const FEE_MARGIN_NUMERATOR: u64 = 11;
pub const FEE_MARGIN_DENOMINATOR: u64 = 10;

/// Re-pricing rounds before the fee loop gives up.
pub const MAX_FEE_ITERATIONS: u32 = 8;

// --- Asset metadata ---

/// How long an unknown asset is not re-queried.
pub const ASSET_NEGATIVE_LOCK: Duration = Duration::from_secs(60 * 60);
