use std::collections::HashMap;

use crate::model::attributes::{HostAttributes, MaintenanceMode};

/// Known attributes of worker hosts, keyed by hostname.
#[derive(Default)]
pub struct AttributeStore {
    hosts: HashMap<String, HostAttributes>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_host_attributes(&mut self, attributes: HostAttributes) {
        self.hosts.insert(attributes.host.clone(), attributes);
    }

    pub fn fetch_host_attributes(&self, host: &str) -> Option<HostAttributes> {
        self.hosts.get(host).cloned()
    }

    pub fn fetch_all(&self) -> Vec<HostAttributes> {
        self.hosts.values().cloned().collect()
    }

    /// Flags a host's maintenance mode; false when the host is unknown.
    pub fn set_maintenance_mode(&mut self, host: &str, mode: MaintenanceMode) -> bool {
        match self.hosts.get_mut(host) {
            Some(attributes) => {
                attributes.maintenance_mode = mode;
                true
            }
            None => false,
        }
    }
}
