//! Default resource quantities used by QoS auto-upgrade
//!
//! A registry holds two tables, default limits and default requests, each
//! mapping `cpu` and `memory` to a quantity string. Builders read a snapshot
//! of the registry once per upgrade attempt.

use crate::error::RegistryError;
use crate::models::{ResourceMap, ResourceName};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::info;

/// Process-wide registry shared by builders that were not given their own
static GLOBAL_DEFAULTS: OnceLock<Arc<ResourceDefaults>> = OnceLock::new();

/// Point-in-time copy of the registry tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultsSnapshot {
    pub limits: ResourceMap,
    pub requests: ResourceMap,
}

/// Thread-safe store of default resource limits and requests
#[derive(Debug, Default)]
pub struct ResourceDefaults {
    tables: RwLock<DefaultsSnapshot>,
}

impl ResourceDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> Arc<ResourceDefaults> {
        GLOBAL_DEFAULTS
            .get_or_init(|| Arc::new(ResourceDefaults::new()))
            .clone()
    }

    /// Register default limits; the map must hold exactly `cpu` and `memory`
    pub fn register_default_limit(&self, limits: ResourceMap) -> Result<(), RegistryError> {
        let limits = validate("limit", limits)?;
        info!(
            event = "default_limit_registered",
            cpu = %limits[&ResourceName::Cpu],
            memory = %limits[&ResourceName::Memory],
            "Registered default resource limits"
        );
        self.write().limits = limits;
        Ok(())
    }

    /// Register default requests; the map must hold exactly `cpu` and `memory`
    pub fn register_default_request(&self, requests: ResourceMap) -> Result<(), RegistryError> {
        let requests = validate("request", requests)?;
        info!(
            event = "default_request_registered",
            cpu = %requests[&ResourceName::Cpu],
            memory = %requests[&ResourceName::Memory],
            "Registered default resource requests"
        );
        self.write().requests = requests;
        Ok(())
    }

    /// Copy both tables under a single read lock
    pub fn snapshot(&self) -> DefaultsSnapshot {
        match self.tables.read() {
            Ok(tables) => tables.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DefaultsSnapshot> {
        // Tables are replaced whole, never half-written
        match self.tables.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn validate(table: &'static str, map: ResourceMap) -> Result<ResourceMap, RegistryError> {
    if map.len() != 2
        || !map.contains_key(&ResourceName::Cpu)
        || !map.contains_key(&ResourceName::Memory)
    {
        return Err(RegistryError::InvalidKeys { table });
    }

    let mut cleaned = ResourceMap::new();
    for (name, value) in map {
        let value = value.trim();
        if value.is_empty() {
            return Err(RegistryError::EmptyValue {
                table,
                resource: name.as_str(),
            });
        }
        cleaned.insert(name, value.to_string());
    }
    Ok(cleaned)
}
