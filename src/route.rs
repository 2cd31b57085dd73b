//! Route and endpoint value types.
//!
//! A [`Route`] describes one forwarding path: the local end on the device and
//! the remote end on the tunnel side. Routes arrive partially specified (a
//! control instruction may only name ports, a config entry may only carry
//! defaults), so every field is optional until [`Route::endpoints`] resolves
//! the four fields into a concrete endpoint pair.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A resolved host/port pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A possibly-partial forwarding route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub local_host: Option<String>,
    pub local_port: Option<u16>,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
}

impl Route {
    /// A fully specified route.
    pub fn new(
        local_host: impl Into<String>,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            local_host: Some(local_host.into()),
            local_port: Some(local_port),
            remote_host: Some(remote_host.into()),
            remote_port: Some(remote_port),
        }
    }

    /// Fill any missing field from `defaults`, keeping fields already set.
    pub fn merge(mut self, defaults: &Route) -> Self {
        if self.local_host.is_none() {
            self.local_host = defaults.local_host.clone();
        }
        if self.local_port.is_none() {
            self.local_port = defaults.local_port;
        }
        if self.remote_host.is_none() {
            self.remote_host = defaults.remote_host.clone();
        }
        if self.remote_port.is_none() {
            self.remote_port = defaults.remote_port;
        }
        self
    }

    /// Resolve into a `(local, remote)` endpoint pair.
    ///
    /// Fails with [`Error::InvalidRoute`] naming the first missing field; an
    /// empty host string counts as missing.
    pub fn endpoints(&self) -> Result<(Endpoint, Endpoint)> {
        let local_host = match self.local_host.as_deref() {
            Some(h) if !h.is_empty() => h,
            _ => return Err(Error::invalid_route("missing local host")),
        };
        let local_port = self
            .local_port
            .ok_or_else(|| Error::invalid_route("missing local port"))?;
        let remote_host = match self.remote_host.as_deref() {
            Some(h) if !h.is_empty() => h,
            _ => return Err(Error::invalid_route("missing remote host")),
        };
        let remote_port = self
            .remote_port
            .ok_or_else(|| Error::invalid_route("missing remote port"))?;

        Ok((
            Endpoint::new(local_host, local_port),
            Endpoint::new(remote_host, remote_port),
        ))
    }
}
