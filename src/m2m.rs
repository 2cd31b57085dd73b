//! The m2m instruction dispatcher.
//!
//! Decodes instructions delivered by the control-channel transport and routes
//! them to the [`PortForwardManager`]. Nothing an instruction contains may
//! crash the control loop: unknown actions are ignored, malformed payloads
//! and downstream failures are logged and contained.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manager::PortForwardManager;
use crate::route::Route;

/// The fixed set of recognized instruction actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    OpenPortRedirect,
    ClosePortRedirect,
    OpenService,
}

impl Action {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "open-portredirect" => Some(Action::OpenPortRedirect),
            "close-portredirect" => Some(Action::ClosePortRedirect),
            "open-service" => Some(Action::OpenService),
            _ => None,
        }
    }
}

/// Owns the control-channel identity and dispatches inbound instructions.
/// Stateless beyond its routing table; every instruction is independent.
pub struct M2mManager {
    url: String,
    identity: String,
    port_forward: Arc<PortForwardManager>,
}

impl M2mManager {
    pub fn new(
        url: impl Into<String>,
        identity: impl Into<String>,
        port_forward: Arc<PortForwardManager>,
    ) -> Self {
        Self {
            url: url.into(),
            identity: identity.into(),
            port_forward,
        }
    }

    /// The control-channel endpoint this dispatcher serves.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The identity this agent presents on the control channel.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Handle one decoded instruction from the control plane.
    ///
    /// Never returns an error: failures are diagnostics here, not conditions
    /// the transport should see.
    pub async fn on_instruction(&self, sender: &str, instruction: Value) {
        let action_name = match instruction.get("action").and_then(Value::as_str) {
            Some(name) => name,
            None => {
                warn!(sender, "instruction without an action field, ignoring");
                return;
            }
        };
        let Some(action) = Action::from_name(action_name) else {
            debug!(sender, action = action_name, "unrecognized action, ignoring");
            return;
        };

        if let Err(e) = self.dispatch(action, &instruction).await {
            match e {
                Error::MalformedInstruction { ref message } => {
                    warn!(sender, action = action_name, message = %message, "malformed instruction")
                }
                e => warn!(sender, action = action_name, error = %e, "instruction failed"),
            }
        }
    }

    async fn dispatch(&self, action: Action, payload: &Value) -> Result<()> {
        match action {
            Action::OpenPortRedirect => {
                let device_port = required_port(payload, "device_port")?;
                let m2m_port = required_port(payload, "m2m_port")?;
                self.port_forward.redirect_port(device_port, m2m_port).await?;
            }
            Action::ClosePortRedirect => {
                let device_port = required_port(payload, "device_port")?;
                self.port_forward.close_port(device_port);
            }
            Action::OpenService => {
                let name = payload
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::malformed("missing 'name'"))?;
                let route = match payload.get("route") {
                    Some(route) => serde_json::from_value::<Route>(route.clone())
                        .map_err(|e| Error::malformed(format!("bad 'route': {e}")))?,
                    None => Route::default(),
                };
                self.port_forward.open_service(Some(name), route).await?;
            }
        }
        Ok(())
    }
}

fn required_port(payload: &Value, field: &str) -> Result<u16> {
    payload
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|port| u16::try_from(port).ok())
        .ok_or_else(|| Error::malformed(format!("missing or invalid '{field}'")))
}
