//! Port enumerator with a scripted port list.

use std::sync::Mutex;

use super::enumerate::{DiscoveryError, PortEnumerator};
use crate::application::station::PortInfo;

/// A [`PortEnumerator`] whose port list is set by the caller.
#[derive(Default)]
pub struct StaticPortEnumerator {
    ports: Mutex<Vec<PortInfo>>,
}

impl StaticPortEnumerator {
    pub fn new(paths: &[&str]) -> Self {
        let enumerator = Self::default();
        enumerator.set_paths(paths);
        enumerator
    }

    /// Replaces the port list, as if devices were plugged or unplugged.
    pub fn set_paths(&self, paths: &[&str]) {
        let ports = paths
            .iter()
            .map(|path| PortInfo {
                path: (*path).to_string(),
                serial_number: None,
            })
            .collect();
        if let Ok(mut current) = self.ports.lock() {
            *current = ports;
        }
    }
}

impl PortEnumerator for StaticPortEnumerator {
    fn list_ports(&self) -> Result<Vec<PortInfo>, DiscoveryError> {
        self.ports
            .lock()
            .map(|ports| ports.clone())
            .map_err(|e| DiscoveryError::Enumerate(e.to_string()))
    }
}
