//! Global device registry: unique id → device handle.
//!
//! The registry holds the strong handles; everything else in the graph
//! points weakly. Reads during steady state share the lock, writes happen
//! only while the builder runs (and when it removes devices that failed
//! validation).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::Device;
use crate::error::ConfigError;

#[derive(Default)]
pub struct Registry {
    devices: RwLock<HashMap<String, Arc<Device>>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a device; ids are globally unique.
    pub fn insert(&self, device: Arc<Device>) -> Result<(), ConfigError> {
        let mut devices = self.devices.write();
        let id = device.id().to_owned();
        if devices.contains_key(&id) {
            return Err(ConfigError::DuplicateId(id));
        }
        devices.insert(id, device);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.read().contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Snapshot of every registered device.
    pub fn all(&self) -> Vec<Arc<Device>> {
        self.devices.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputEntry;
    use crate::input::{Input, InputKind};

    fn input(name: &str) -> Arc<Device> {
        Input::create(
            InputKind::Switch,
            &InputEntry {
                name: name.to_owned(),
                username: None,
                userdescription: None,
                default: None,
                min: None,
                max: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = Registry::new();
        registry.insert(input("a")).unwrap();
        assert!(matches!(registry.insert(input("a")), Err(ConfigError::DuplicateId(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_and_removal() {
        let registry = Registry::new();
        registry.insert(input("a")).unwrap();
        assert!(registry.contains("a"));
        assert!(registry.get("a").is_some());
        assert!(registry.remove("a").is_some());
        assert!(registry.is_empty());
    }
}
