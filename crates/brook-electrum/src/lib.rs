//! Electrum protocol client for Brook.
//!
//! Two layers:
//! - [`socket::SocketRpcClient`]: id-correlated JSON-RPC 2.0 over any byte
//!   stream, with batching, per-request timeouts and tolerant framing.
//! - [`client::ElectrumClient`]: the chain-index vocabulary (balances,
//!   history, unspent outputs, transactions, fees, broadcast) plus peer
//!   rotation, capability detection and reconnection.

pub mod blockclock;
pub mod capability;
pub mod client;
pub mod config;
pub mod connector;
pub mod decode;
pub mod fees;
pub mod framing;
pub mod peers;
pub mod pending;
pub mod socket;
pub mod types;

pub use client::{ElectrumClient, scripthash_for_address};
pub use config::ElectrumConfig;
pub use connector::{BoxedStream, Connector, TcpConnector};
pub use fees::{FeeEstimates, FeeHistogram};
pub use socket::{SocketOptions, SocketRpcClient};
pub use types::{ConnectionState, ConnectionStatus, VerboseTransaction};
