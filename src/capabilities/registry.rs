//! Capability registry: the allowlist.
//!
//! Built once at startup through [`RegistryBuilder`] and immutable
//! afterwards: there is no way to add a capability to a built registry.
//! Lookups are exact and case-sensitive, with no aliasing or fuzzy matching.

use std::collections::HashMap;

use anyhow::{bail, Result};
use thiserror::Error;

use super::Capability;

#[derive(Debug, Clone, Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

pub struct CapabilityRegistry {
    capabilities: Vec<Box<dyn Capability>>,
    by_name: HashMap<String, usize>,
    by_endpoint: HashMap<String, usize>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    capabilities: Vec<Box<dyn Capability>>,
}

impl RegistryBuilder {
    pub fn register(mut self, capability: Box<dyn Capability>) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Freezes the registry. Duplicate names or endpoints are rejected.
    pub fn build(self) -> Result<CapabilityRegistry> {
        let mut by_name = HashMap::new();
        let mut by_endpoint = HashMap::new();

        for (index, capability) in self.capabilities.iter().enumerate() {
            let name = capability.name().to_string();
            if by_name.insert(name.clone(), index).is_some() {
                bail!("Capability '{name}' registered twice");
            }

            let mut endpoints = vec![capability.endpoint()];
            endpoints.extend(capability.aliases().iter().map(|a| a.to_string()));
            for endpoint in endpoints {
                if by_endpoint.insert(endpoint.clone(), index).is_some() {
                    bail!("Endpoint '/{endpoint}' claimed by more than one capability");
                }
            }
        }

        Ok(CapabilityRegistry {
            capabilities: self.capabilities,
            by_name,
            by_endpoint,
        })
    }
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Looks up a capability by exact name.
    pub fn resolve(&self, name: &str) -> Result<&dyn Capability, UnknownCapability> {
        self.by_name
            .get(name)
            .map(|&i| self.capabilities[i].as_ref())
            .ok_or_else(|| UnknownCapability(name.to_string()))
    }

    /// Looks up a capability by HTTP endpoint (e.g. `count-weekdays`).
    pub fn resolve_endpoint(&self, endpoint: &str) -> Option<&dyn Capability> {
        self.by_endpoint
            .get(endpoint)
            .map(|&i| self.capabilities[i].as_ref())
    }

    /// Capabilities in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Capability> {
        self.capabilities.iter().map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
