//! Type registry
//!
//! Maps a [`ResourceType`] to its [`Registration`]. Types are normally
//! registered once while the process starts, but lookups stay safe while a
//! late registration is in progress.


use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::ResourceType;
use crate::Result;
use crate::StoreError;

/// Registration metadata for one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub resource_type: ResourceType,
    pub metadata: HashMap<String, String>,
}

impl Registration {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    types: RwLock<HashMap<ResourceType, Registration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type. Registering the same type twice always fails.
    pub fn register(
        &self,
        registration: Registration,
    ) -> Result<()> {
        let mut types = self.types.write();
        if types.contains_key(&registration.resource_type) {
            return Err(StoreError::TypeAlreadyRegistered(registration.resource_type).into());
        }

        debug!(resource_type = %registration.resource_type, "Resource type registered");
        types.insert(registration.resource_type.clone(), registration);
        Ok(())
    }

    pub fn resolve(
        &self,
        resource_type: &ResourceType,
    ) -> Option<Registration> {
        self.types.read().get(resource_type).cloned()
    }

    /// Like [`Registry::resolve`], failing with `TypeNotRegistered` on a miss.
    pub fn require(
        &self,
        resource_type: &ResourceType,
    ) -> Result<Registration> {
        self.resolve(resource_type)
            .ok_or_else(|| StoreError::TypeNotRegistered(resource_type.clone()).into())
    }

    pub fn types(&self) -> Vec<ResourceType> {
        self.types.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
