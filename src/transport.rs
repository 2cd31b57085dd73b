//! Transport seam between the core and the outside world.
//!
//! The core never opens sockets directly; it asks a [`Transport`] for a raw
//! byte stream to an endpoint. The agent binary plugs in [`TcpTransport`];
//! tests plug in an in-memory implementation.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::route::Endpoint;

/// Object-safe alias for anything that can carry relay bytes.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a byte stream to `endpoint`.
    async fn open_stream(&self, endpoint: &Endpoint) -> std::io::Result<Box<dyn ByteStream>>;
}

/// Plain TCP transport used by the agent binary.
#[derive(Debug, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn open_stream(&self, endpoint: &Endpoint) -> std::io::Result<Box<dyn ByteStream>> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
