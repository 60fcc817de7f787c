//! Core data types shared across Brook crates.

use std::fmt;
use std::str::FromStr;

use bitcoin::{OutPoint, Script, Txid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A candidate indexing-server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Optional path component (websocket-style endpoints).
    #[serde(default)]
    pub path: Option<String>,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: None,
        }
    }

    /// `host:port`, suitable for a socket connect.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}:{}/{}", self.host, self.port, path.trim_start_matches('/')),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

impl FromStr for Peer {
    type Err = String;

    /// Parse `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in peer '{s}'"))?;
        if host.is_empty() {
            return Err(format!("missing host in peer '{s}'"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in peer '{s}': {e}"))?;
        Ok(Peer::new(host, port))
    }
}

/// BIP32 chain within an account: receive (external) or change (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    External,
    Internal,
}

impl Chain {
    /// Derivation index of this chain under the account key.
    pub fn index(self) -> u32 {
        match self {
            Chain::External => 0,
            Chain::Internal => 1,
        }
    }

    pub const ALL: [Chain; 2] = [Chain::External, Chain::Internal];
}

/// Script type of the wallet's own addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressType {
    /// BIP84 p2wpkh.
    NativeSegwit,
    /// BIP49 p2sh-p2wpkh.
    NestedSegwit,
}

impl AddressType {
    /// BIP43 purpose field for this script type.
    pub fn purpose(self) -> u32 {
        match self {
            AddressType::NativeSegwit => 84,
            AddressType::NestedSegwit => 49,
        }
    }
}

impl FromStr for AddressType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native-segwit" | "p2wpkh" | "bip84" => Ok(AddressType::NativeSegwit),
            "nested-segwit" | "p2sh-p2wpkh" | "bip49" => Ok(AddressType::NestedSegwit),
            other => Err(format!("unknown address type: {other}")),
        }
    }
}

/// Electrum scripthash: SHA-256 of the output script, byte-reversed.
///
/// Used as the query key for every `blockchain.scripthash.*` call.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptHash([u8; 32]);

impl ScriptHash {
    pub fn from_script(script: &Script) -> Self {
        let digest = Sha256::digest(script.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        bytes.reverse();
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptHash({})", self.to_hex())
    }
}

/// Issued-asset identifier on the confidential chain, in display byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId([u8; 32]);

impl AssetId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", hex::encode(self.0))
    }
}

impl FromStr for AssetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid asset id '{s}': {e}"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| format!("asset id '{s}' is not 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for AssetId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry of `blockchain.scripthash.get_history`.
///
/// `height > 0` is confirmed, `0` is in the mempool, `-1` is in the mempool
/// with unconfirmed parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub tx_hash: Txid,
    pub height: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
}

/// Result of `blockchain.scripthash.get_balance`, in satoshis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

impl Balance {
    pub fn total(&self) -> i64 {
        self.confirmed.saturating_add(self.unconfirmed)
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed == 0 && self.unconfirmed == 0
    }
}

impl std::ops::AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.confirmed = self.confirmed.saturating_add(rhs.confirmed);
        self.unconfirmed = self.unconfirmed.saturating_add(rhs.unconfirmed);
    }
}

/// One entry of `blockchain.scripthash.listunspent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentEntry {
    pub tx_hash: Txid,
    pub tx_pos: u32,
    /// Explicit value in satoshis. Confidential chains report no value here.
    #[serde(default)]
    pub value: u64,
    pub height: i64,
}

impl UnspentEntry {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_hash, self.tx_pos)
    }
}

/// A spendable output owned by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
    /// Address that owns the output.
    pub address: String,
    /// Confirmation height (0 when unconfirmed).
    pub height: i64,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    pub fn is_confirmed(&self) -> bool {
        self.height > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::ScriptBuf;

    #[test]
    fn peer_parse_and_display() {
        let peer: Peer = "electrum.example.org:50001".parse().unwrap();
        assert_eq!(peer.host, "electrum.example.org");
        assert_eq!(peer.port, 50001);
        assert_eq!(peer.to_string(), "electrum.example.org:50001");
        assert_eq!(peer.socket_addr(), "electrum.example.org:50001");
    }

    #[test]
    fn peer_parse_rejects_missing_port() {
        assert!("electrum.example.org".parse::<Peer>().is_err());
        assert!(":50001".parse::<Peer>().is_err());
        assert!("host:notaport".parse::<Peer>().is_err());
    }

    #[test]
    fn chain_indices() {
        assert_eq!(Chain::External.index(), 0);
        assert_eq!(Chain::Internal.index(), 1);
    }

    #[test]
    fn address_type_purpose_and_parse() {
        assert_eq!(AddressType::NativeSegwit.purpose(), 84);
        assert_eq!(AddressType::NestedSegwit.purpose(), 49);
        assert_eq!("p2wpkh".parse::<AddressType>().unwrap(), AddressType::NativeSegwit);
        assert_eq!("nested-segwit".parse::<AddressType>().unwrap(), AddressType::NestedSegwit);
        assert!("taproot".parse::<AddressType>().is_err());
    }

    #[test]
    fn scripthash_known_vector() {
        // Electrum protocol docs: p2pkh script of 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa.
        let script = ScriptBuf::from_hex("76a91462e907b15cbf27d5425399ebf6f0fb50ebb88f1888ac").unwrap();
        let sh = ScriptHash::from_script(&script);
        assert_eq!(
            sh.to_hex(),
            "8b01df4e368ea28f8dc0423bcf7a4923e3a12d307c875e47a0cfbf90b5c39161"
        );
    }

    #[test]
    fn balance_total_and_add() {
        let mut b = Balance {
            confirmed: 10,
            unconfirmed: -3,
        };
        assert_eq!(b.total(), 7);
        b += Balance {
            confirmed: 5,
            unconfirmed: 3,
        };
        assert_eq!(b, Balance { confirmed: 15, unconfirmed: 0 });
        assert!(!b.is_empty());
        assert!(Balance::default().is_empty());
    }

    #[test]
    fn asset_id_hex_roundtrip_and_serde() {
        let hex_id = "6f0279e9ed041c3d710a9f57d0c02928416460c4b722ae3457a11eec381c526d";
        let id: AssetId = hex_id.parse().unwrap();
        assert_eq!(id.to_string(), hex_id);
        assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{hex_id}\""));
        assert!("abcd".parse::<AssetId>().is_err());
        assert!("zz".parse::<AssetId>().is_err());
    }

    #[test]
    fn history_entry_deserializes_electrum_shape() {
        let json = r#"{"tx_hash":"4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b","height":0,"fee":250}"#;
        let entry: HistoryEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.height, 0);
        assert_eq!(entry.fee, Some(250));
    }

    #[test]
    fn unspent_entry_outpoint() {
        let json = r#"{"tx_hash":"4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b","tx_pos":1,"value":5000,"height":100}"#;
        let entry: UnspentEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.outpoint().vout, 1);
        assert_eq!(entry.value, 5000);
    }
}
