//! Shared test helpers.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use portgate::{ByteStream, Endpoint, Transport};
use tokio::io::DuplexStream;

/// Find an available TCP port for testing.
pub fn find_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind to random port");
    listener.local_addr().unwrap().port()
}

/// In-memory transport that records every endpoint it is asked to open and
/// hands back one half of a duplex pipe. The far halves are kept alive so
/// relays stay running for the duration of a test.
#[derive(Default)]
pub struct MockTransport {
    pub opened: Mutex<Vec<Endpoint>>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened_endpoints(&self) -> Vec<Endpoint> {
        self.opened.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_stream(&self, endpoint: &Endpoint) -> std::io::Result<Box<dyn ByteStream>> {
        self.opened.lock().unwrap().push(endpoint.clone());
        let (near, far) = tokio::io::duplex(4096);
        self.peers.lock().unwrap().push(far);
        Ok(Box::new(near))
    }
}

/// Transport whose connects always fail.
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn open_stream(&self, _endpoint: &Endpoint) -> std::io::Result<Box<dyn ByteStream>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }
}

/// Simple echo TCP server for relay testing.
pub struct EchoServer {
    pub port: u16,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind echo server");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                if let Ok((mut socket, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let (mut reader, mut writer) = socket.split();
                        let _ = tokio::io::copy(&mut reader, &mut writer).await;
                    });
                }
            }
        });

        Self { port }
    }
}
