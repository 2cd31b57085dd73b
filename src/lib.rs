//! portgate: a port-forwarding agent for managed devices.
//!
//! A remote control plane delivers instructions over a persistent m2m
//! channel; the agent translates them into live bidirectional TCP relays.
//! The [`m2m::M2mManager`] decodes instructions and routes them to the
//! [`manager::PortForwardManager`], which owns every active
//! [`service::Service`] for the full duration of its relay.

pub mod config;
pub mod error;
pub mod logging;
pub mod m2m;
pub mod manager;
pub mod registry;
pub mod route;
pub mod service;
pub mod transport;

pub use config::AgentConfig;
pub use error::{Error, Result};
pub use m2m::M2mManager;
pub use manager::PortForwardManager;
pub use registry::{ServiceDefinition, ServiceRegistry};
pub use route::{Endpoint, Route};
pub use service::{Service, ServiceState};
pub use transport::{ByteStream, TcpTransport, Transport};
