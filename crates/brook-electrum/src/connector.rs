//! Stream construction for a peer.
//!
//! The chain-index client never opens sockets itself; it asks a [`Connector`]
//! for a byte stream. Production uses [`TcpConnector`]; tests hand out
//! in-memory duplex pipes.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use brook_core::types::Peer;

/// Anything the socket client can run over.
pub trait RpcStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RpcStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn RpcStream>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, peer: &Peer) -> std::io::Result<BoxedStream>;
}

/// Plain TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, peer: &Peer) -> std::io::Result<BoxedStream> {
        let stream = TcpStream::connect(peer.socket_addr()).await?;
        stream.set_nodelay(true)?;
        debug!(%peer, "tcp connected");
        Ok(Box::new(stream))
    }
}
