//! A single forwarded connection and its relay task.

use std::sync::{Arc, Mutex, Weak};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::registry::ServiceDefinition;
use crate::route::Endpoint;
use crate::transport::{ByteStream, Transport};

/// Lifecycle of a [`Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Connecting,
    Connected,
    Closed,
    Failed,
}

impl ServiceState {
    fn name(self) -> &'static str {
        match self {
            ServiceState::Created => "created",
            ServiceState::Connecting => "connecting",
            ServiceState::Connected => "connected",
            ServiceState::Closed => "closed",
            ServiceState::Failed => "failed",
        }
    }
}

/// One live forwarded connection: a local endpoint, a remote tunnel endpoint
/// and the relay task shuttling bytes between them.
///
/// The [`PortForwardManager`](crate::manager::PortForwardManager) that creates
/// a service owns it through its active set; callers may drop their handle
/// without stopping the relay. The definition back-reference is weak and only
/// identifies the service in diagnostics.
pub struct Service {
    definition: Option<Weak<ServiceDefinition>>,
    local: Endpoint,
    remote: Endpoint,
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<ServiceState>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Service {
    pub(crate) fn new(
        definition: Option<&Arc<ServiceDefinition>>,
        local: Endpoint,
        remote: Endpoint,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            definition: definition.map(Arc::downgrade),
            local,
            remote,
            transport,
            state: Arc::new(Mutex::new(ServiceState::Created)),
            shutdown: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap()
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    /// Name of the configured service this connection belongs to, if any.
    pub fn service_name(&self) -> Option<String> {
        self.definition
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|definition| definition.name.clone())
    }

    fn label(&self) -> String {
        self.service_name()
            .unwrap_or_else(|| format!("redirect-{}", self.local.port))
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.lock().unwrap() = state;
    }

    /// Establish both ends of the route and start relaying.
    ///
    /// Valid exactly once, on a freshly created service. Returns once the
    /// relay task is running; the relay itself continues until either peer
    /// disconnects or [`close`](Service::close) is called.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ServiceState::Created {
                return Err(Error::InvalidState {
                    expected: ServiceState::Created.name(),
                    actual: state.name(),
                });
            }
            *state = ServiceState::Connecting;
        }

        let local_stream = match self.transport.open_stream(&self.local).await {
            Ok(stream) => stream,
            Err(source) => {
                self.set_state(ServiceState::Failed);
                return Err(Error::Connect {
                    endpoint: self.local.to_string(),
                    source,
                });
            }
        };
        let remote_stream = match self.transport.open_stream(&self.remote).await {
            Ok(stream) => stream,
            Err(source) => {
                self.set_state(ServiceState::Failed);
                return Err(Error::Connect {
                    endpoint: self.remote.to_string(),
                    source,
                });
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown.lock().unwrap() = Some(shutdown_tx);
        self.set_state(ServiceState::Connected);
        info!(
            service = %self.label(),
            local = %self.local,
            remote = %self.remote,
            "forwarding established"
        );

        let label = self.label();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            relay(&label, local_stream, remote_stream, shutdown_rx).await;
            let mut state = state.lock().unwrap();
            if *state == ServiceState::Connected {
                *state = ServiceState::Closed;
            }
        });
        Ok(())
    }

    /// Terminate the relay and release both sockets. Idempotent.
    pub fn close(&self) {
        let shutdown_tx = self.shutdown.lock().unwrap().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        let mut state = self.state.lock().unwrap();
        if !matches!(*state, ServiceState::Closed | ServiceState::Failed) {
            debug!(service = %self.label(), "service closed");
            *state = ServiceState::Closed;
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("state", &self.state())
            .finish()
    }
}

/// Shuttle bytes between the two streams until either side ends or the
/// shutdown channel fires. The shutdown branch also triggers when the last
/// owner of the service drops the sender, so an unowned relay cannot leak.
async fn relay(
    label: &str,
    local: Box<dyn ByteStream>,
    remote: Box<dyn ByteStream>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    let outbound = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = local_rd.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            remote_wr.write_all(&buf[..n]).await?;
            remote_wr.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    };

    let inbound = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = remote_rd.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            local_wr.write_all(&buf[..n]).await?;
            local_wr.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    };

    tokio::select! {
        result = async { tokio::try_join!(outbound, inbound) } => {
            match result {
                // Either peer hung up; tunnels ending this way is normal.
                Ok(_) => debug!(service = label, "relay finished"),
                Err(e) => warn!(service = label, error = %e, "relay ended with I/O error"),
            }
        }
        _ = &mut shutdown_rx => {
            debug!(service = label, "relay shut down");
        }
    }
}
