//! Name to endpoint map.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::endpoint::Endpoint;
use crate::errors::{RouterError, RouterResult};

/// Registered endpoints, keyed by name.
///
/// Mutated by register/unregister; dispatch only reads.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<HashMap<String, Arc<dyn Endpoint>>>,
}

impl EndpointRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an endpoint. The first registration of a name wins.
    pub fn insert(&self, endpoint: Arc<dyn Endpoint>) -> RouterResult<()> {
        let mut endpoints = self.endpoints.write();
        let name = endpoint.name().to_string();
        if endpoints.contains_key(&name) {
            return Err(RouterError::DuplicateEndpoint { name });
        }
        endpoints.insert(name, endpoint);
        Ok(())
    }

    /// Removes an endpoint by name.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.write().remove(name)
    }

    /// Looks up an endpoint by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.read().get(name).cloned()
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.read().contains_key(name)
    }

    /// Returns all registered endpoints.
    pub fn all(&self) -> Vec<Arc<dyn Endpoint>> {
        self.endpoints.read().values().cloned().collect()
    }

    /// Returns registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes and returns every endpoint.
    pub fn drain(&self) -> Vec<Arc<dyn Endpoint>> {
        self.endpoints.write().drain().map(|(_, e)| e).collect()
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
