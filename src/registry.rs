//! Static service definitions and the lookup registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::route::Route;

/// One configured service: a unique name, the local port it listens on and
/// the default route used when an instruction does not spell one out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub local_port: u16,
    #[serde(default)]
    pub default_route: Route,
}

/// Read-only registry of configured services, keyed by name and by local
/// port. Built once at startup; safe for concurrent lookup without locking.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    by_name: HashMap<String, Arc<ServiceDefinition>>,
    by_port: HashMap<u16, Arc<ServiceDefinition>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured definitions, enforcing name and
    /// local-port uniqueness.
    pub fn from_definitions(definitions: Vec<ServiceDefinition>) -> Result<Self> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, definition: ServiceDefinition) -> Result<()> {
        if self.by_name.contains_key(&definition.name) {
            return Err(Error::DuplicateService {
                message: format!("name '{}' already registered", definition.name),
            });
        }
        if self.by_port.contains_key(&definition.local_port) {
            return Err(Error::DuplicateService {
                message: format!("local port {} already registered", definition.local_port),
            });
        }
        let definition = Arc::new(definition);
        self.by_name
            .insert(definition.name.clone(), Arc::clone(&definition));
        self.by_port.insert(definition.local_port, definition);
        Ok(())
    }

    /// Look up a definition by name. Absence is `None`, not an error; the
    /// caller decides whether that means no-op or failure.
    pub fn lookup(&self, name: &str) -> Option<Arc<ServiceDefinition>> {
        self.by_name.get(name).cloned()
    }

    /// Look up a definition by its local port. Same contract as [`lookup`].
    ///
    /// [`lookup`]: ServiceRegistry::lookup
    pub fn lookup_port(&self, port: u16) -> Option<Arc<ServiceDefinition>> {
        self.by_port.get(&port).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
