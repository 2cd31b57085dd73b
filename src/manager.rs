//! The port-forward manager: registry lookups, service lifecycle and the
//! active-set ownership rules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::registry::{ServiceDefinition, ServiceRegistry};
use crate::route::Route;
use crate::service::Service;
use crate::transport::Transport;

/// Orchestrates forwarded connections on behalf of the control plane.
///
/// Every service the manager creates is inserted into its active set before
/// the creating call returns, and stays there until [`close_port`] or
/// [`shutdown`] removes it. Membership in that set, not any caller-held
/// reference, is what keeps a tunnel alive.
///
/// [`close_port`]: PortForwardManager::close_port
/// [`shutdown`]: PortForwardManager::shutdown
pub struct PortForwardManager {
    transport: Arc<dyn Transport>,
    registry: ServiceRegistry,
    local_host: String,
    tunnel_host: String,
    // Keyed by local device port. Guard is never held across an await.
    active: Mutex<HashMap<u16, Arc<Service>>>,
}

impl PortForwardManager {
    /// Canonical constructor; binds the manager to its transport context.
    pub fn init(
        transport: Arc<dyn Transport>,
        registry: ServiceRegistry,
        local_host: impl Into<String>,
        tunnel_host: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            registry,
            local_host: local_host.into(),
            tunnel_host: tunnel_host.into(),
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Configured definition for `name`, `None` when unknown.
    pub fn get_service(&self, name: &str) -> Option<Arc<ServiceDefinition>> {
        self.registry.lookup(name)
    }

    /// Configured definition for a local port, `None` when unknown.
    pub fn get_service_on_port(&self, port: u16) -> Option<Arc<ServiceDefinition>> {
        self.registry.lookup_port(port)
    }

    /// Open a forwarded connection for a named service.
    ///
    /// An unknown name is a no-op (`Ok(None)`): remote instructions may refer
    /// to services never configured on this device, and that must not be
    /// fatal. An incomplete route after merging the definition defaults is a
    /// caller error and fails with [`Error::InvalidRoute`].
    pub async fn open_service(
        &self,
        name: Option<&str>,
        route: Route,
    ) -> Result<Option<Arc<Service>>> {
        let definition = match name {
            Some(name) => match self.registry.lookup(name) {
                Some(definition) => Some(definition),
                None => {
                    debug!(service = name, "unknown service, ignoring open request");
                    return Ok(None);
                }
            },
            None => None,
        };

        let route = match &definition {
            Some(definition) => route.merge(&definition.default_route).merge(&Route {
                local_host: Some(self.local_host.clone()),
                local_port: Some(definition.local_port),
                remote_host: None,
                remote_port: None,
            }),
            None => route,
        };
        let (local, remote) = route.endpoints()?;

        let service = Arc::new(Service::new(
            definition.as_ref(),
            local,
            remote,
            Arc::clone(&self.transport),
        ));
        service.connect().await?;
        self.retain(Arc::clone(&service));
        Ok(Some(service))
    }

    /// Open a tunnel from an m2m port to a configured service, selected by
    /// exactly one of `service` (name) or `port` (local port).
    pub async fn open(
        &self,
        m2m_port: u16,
        service: Option<&str>,
        port: Option<u16>,
    ) -> Result<Option<Arc<Service>>> {
        let definition = match (service, port) {
            (Some(name), None) => self.registry.lookup(name),
            (None, Some(port)) => self.registry.lookup_port(port),
            (Some(_), Some(_)) => {
                return Err(Error::invalid_route(
                    "specify a service name or a port, not both",
                ))
            }
            (None, None) => {
                return Err(Error::invalid_route(
                    "neither a service name nor a port was specified",
                ))
            }
        };
        let Some(definition) = definition else {
            debug!(?service, ?port, "unknown open target, ignoring");
            return Ok(None);
        };

        let route = Route {
            local_host: None,
            local_port: None,
            remote_host: Some(self.tunnel_host.clone()),
            remote_port: Some(m2m_port),
        };
        self.open_service(Some(definition.name.as_str()), route).await
    }

    /// Ad-hoc redirection of a device port to an m2m tunnel port, bypassing
    /// the registry. The two arguments fully specify the route, so there is
    /// no unknown-service case.
    pub async fn redirect_port(&self, device_port: u16, m2m_port: u16) -> Result<Arc<Service>> {
        let route = Route::new(
            self.local_host.clone(),
            device_port,
            self.tunnel_host.clone(),
            m2m_port,
        );
        let (local, remote) = route.endpoints()?;

        let service = Arc::new(Service::new(
            None,
            local,
            remote,
            Arc::clone(&self.transport),
        ));
        service.connect().await?;
        self.retain(Arc::clone(&service));
        info!(device_port, m2m_port, "port redirect opened");
        Ok(service)
    }

    /// Install a connected service as the active one for its local port.
    /// A port already forwarded is replaced: the old service is closed.
    fn retain(&self, service: Arc<Service>) {
        let port = service.local().port;
        let replaced = self.active.lock().unwrap().insert(port, service);
        if let Some(old) = replaced {
            warn!(port, "replacing existing forward on port");
            old.close();
        }
    }

    /// Close and discard the service forwarding `device_port`. Returns false
    /// when no such service exists; closing twice is harmless.
    pub fn close_port(&self, device_port: u16) -> bool {
        let removed = self.active.lock().unwrap().remove(&device_port);
        match removed {
            Some(service) => {
                service.close();
                info!(device_port, "port redirect closed");
                true
            }
            None => {
                debug!(device_port, "no active forward on port");
                false
            }
        }
    }

    /// Currently forwarded local ports.
    pub fn active_ports(&self) -> Vec<u16> {
        self.active.lock().unwrap().keys().copied().collect()
    }

    /// The active service on a local port, if any.
    pub fn active_service(&self, device_port: u16) -> Option<Arc<Service>> {
        self.active.lock().unwrap().get(&device_port).cloned()
    }

    /// Close every active service.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut active = self.active.lock().unwrap();
            active.drain().collect()
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "shutting down all forwards");
        }
        for (_, service) in drained {
            service.close();
        }
    }
}
