//! Agent configuration loaded from `portgate.toml`.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::registry::{ServiceDefinition, ServiceRegistry};

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

/// Agent configuration.
///
/// ```toml
/// channel_url = "ws://m2m.example.com/agent/"
/// serial = "device-9f3a"
/// local_host = "127.0.0.1"
///
/// [[service]]
/// name = "web"
/// local_port = 80
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Control-channel endpoint.
    pub channel_url: String,

    /// Identity this device presents to the control plane.
    pub serial: String,

    /// Host local forwards connect to on the device.
    #[serde(default = "default_local_host")]
    pub local_host: String,

    /// Host carrying the m2m tunnel ports. Defaults to the channel host.
    #[serde(default)]
    pub tunnel_host: Option<String>,

    #[serde(default, rename = "service")]
    pub services: Vec<ServiceDefinition>,
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            message: format!("failed to parse config: {e}"),
        })
    }

    /// Build the service registry, enforcing name/port uniqueness.
    pub fn registry(&self) -> Result<ServiceRegistry> {
        ServiceRegistry::from_definitions(self.services.clone())
    }

    /// The host carrying m2m tunnel ports: explicit `tunnel_host`, or the
    /// host component of `channel_url`.
    pub fn tunnel_host(&self) -> Result<String> {
        if let Some(host) = &self.tunnel_host {
            return Ok(host.clone());
        }
        let rest = self
            .channel_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.channel_url);
        let host = rest
            .split(['/', ':'])
            .next()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::Config {
                message: format!("no host in channel_url '{}'", self.channel_url),
            })?;
        Ok(host.to_string())
    }
}
