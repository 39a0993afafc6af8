use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single named attribute on a host, e.g. `rack -> {r1}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: BTreeSet<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaintenanceMode {
    #[default]
    None,
    Scheduled,
    Draining,
    Drained,
}

impl std::fmt::Display for MaintenanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MaintenanceMode::None => "NONE",
            MaintenanceMode::Scheduled => "SCHEDULED",
            MaintenanceMode::Draining => "DRAINING",
            MaintenanceMode::Drained => "DRAINED",
        };
        write!(f, "{name}")
    }
}

/// Attributes and maintenance state of a worker host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAttributes {
    pub host: String,
    pub attributes: BTreeSet<Attribute>,
    pub maintenance_mode: MaintenanceMode,
}

impl HostAttributes {
    pub fn new(host: impl Into<String>, attributes: impl IntoIterator<Item = Attribute>) -> Self {
        Self {
            host: host.into(),
            attributes: attributes.into_iter().collect(),
            maintenance_mode: MaintenanceMode::None,
        }
    }

    pub fn with_maintenance_mode(mut self, mode: MaintenanceMode) -> Self {
        self.maintenance_mode = mode;
        self
    }

    /// All values of the named attribute, empty when the host lacks it.
    pub fn values_of(&self, name: &str) -> BTreeSet<String> {
        self.attributes
            .iter()
            .filter(|a| a.name == name)
            .flat_map(|a| a.values.iter().cloned())
            .collect()
    }
}
