//! Response types of the chain-index client.

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

/// Verbose transaction, in the shape bitcoind's `getrawtransaction` uses.
///
/// Servers that support verbose output return this directly; for the rest
/// it is reconstructed locally from the raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerboseTransaction {
    pub txid: Txid,
    /// Witness txid.
    pub hash: String,
    pub version: i32,
    pub size: u64,
    pub vsize: u64,
    pub weight: u64,
    pub locktime: u32,
    pub vin: Vec<VerboseInput>,
    pub vout: Vec<VerboseOutput>,
    pub hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocktime: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerboseInput {
    /// Present only on coinbase inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Txid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    #[serde(rename = "scriptSig", default, skip_serializing_if = "Option::is_none")]
    pub script_sig: Option<ScriptSig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub txinwitness: Vec<String>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSig {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerboseOutput {
    /// Amount in BTC.
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

impl VerboseOutput {
    /// Amount in satoshis.
    pub fn value_sat(&self) -> u64 {
        (self.value * 100_000_000.0).round() as u64
    }

    /// First address paying to this output, in either server format.
    pub fn address(&self) -> Option<&str> {
        self.script_pub_key
            .address
            .as_deref()
            .or_else(|| self.script_pub_key.addresses.first().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Older servers report a list instead of `address`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

/// Snapshot of the chain-index session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Software banner from `server.version`.
    pub server_name: Option<String>,
    pub peer: Option<brook_core::types::Peer>,
    pub batching: bool,
    /// Server rejected verbose transaction output at least once.
    pub verbose_unsupported: bool,
    /// When the last request was sent on the current socket.
    pub last_call: Option<std::time::Instant>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    /// Handshake failed; carries the attempt number.
    Failed(u32),
}
