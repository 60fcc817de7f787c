//! Configuration for the chain-index client.

use std::time::Duration;

use bitcoin::Network;

use brook_core::constants::{
    BATCH_CHUNK_SIZE, CLIENT_NAME, CONNECT_TIMEOUT, ELECTRUM_PROTOCOL_VERSION, HANDSHAKE_ATTEMPTS,
    HANDSHAKE_RETRY_BACKOFF, MAX_FAILED_PARSE_PASSES, MAX_FRAME_BUFFER, RECONNECT_DELAY,
    REQUEST_TIMEOUT,
};
use brook_core::types::Peer;

use crate::socket::SocketOptions;

#[derive(Debug, Clone)]
pub struct ElectrumConfig {
    /// Network used for address encoding in decoded transactions.
    pub network: Network,
    /// Static peer list, rotated round-robin on failure.
    pub peers: Vec<Peer>,
    /// User-chosen peer, tried before the static list.
    pub saved_peer: Option<Peer>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Minimum handshake attempts per `connect()`; the effective count is
    /// at least the number of peers.
    pub handshake_attempts: u32,
    pub retry_backoff: Duration,
    pub reconnect_delay: Duration,
    pub client_name: String,
    pub protocol_version: String,
    pub batch_chunk_size: usize,
    pub max_frame_buffer: usize,
    pub max_failed_passes: u32,
}

impl Default for ElectrumConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            peers: Vec::new(),
            saved_peer: None,
            request_timeout: REQUEST_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            handshake_attempts: HANDSHAKE_ATTEMPTS,
            retry_backoff: HANDSHAKE_RETRY_BACKOFF,
            reconnect_delay: RECONNECT_DELAY,
            client_name: CLIENT_NAME.to_string(),
            protocol_version: ELECTRUM_PROTOCOL_VERSION.to_string(),
            batch_chunk_size: BATCH_CHUNK_SIZE,
            max_frame_buffer: MAX_FRAME_BUFFER,
            max_failed_passes: MAX_FAILED_PARSE_PASSES,
        }
    }
}

impl ElectrumConfig {
    /// Bitcoin mainnet over plain TCP.
    pub fn mainnet() -> Self {
        Self {
            network: Network::Bitcoin,
            peers: vec![
                Peer::new("electrum.blockstream.info", 50001),
                Peer::new("electrum.emzy.de", 50001),
                Peer::new("electrum.bitaroo.net", 50001),
            ],
            ..Self::default()
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            peers: vec![Peer::new("electrum.blockstream.info", 60001)],
            ..Self::default()
        }
    }

    /// Liquid mainnet. The public endpoint is TLS-only, so this preset needs
    /// a TLS-capable `Connector`.
    pub fn liquid() -> Self {
        Self {
            network: Network::Bitcoin,
            peers: vec![Peer::new("blockstream.info", 995)],
            ..Self::default()
        }
    }

    /// Attempts one `connect()` makes before giving up.
    pub fn effective_attempts(&self) -> u32 {
        let peers = self.peers.len() + usize::from(self.saved_peer.is_some());
        self.handshake_attempts.max(u32::try_from(peers).unwrap_or(u32::MAX))
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            request_timeout: self.request_timeout,
            max_frame_buffer: self.max_frame_buffer,
            max_failed_passes: self.max_failed_passes,
        }
    }
}
