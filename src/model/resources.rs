use serde::{Deserialize, Serialize};

use crate::model::task::TaskConfig;

/// A bundle of schedulable resources, either offered by a slot or required
/// by a task.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    pub num_cpus: f64,
    pub ram_mb: u64,
    pub disk_mb: u64,
    pub num_ports: usize,
}

impl Resources {
    pub fn new(num_cpus: f64, ram_mb: u64, disk_mb: u64, num_ports: usize) -> Self {
        Self {
            num_cpus,
            ram_mb,
            disk_mb,
            num_ports,
        }
    }

    /// The resources a task reserves, including its requested ports.
    pub fn from_task(task: &TaskConfig) -> Self {
        Self {
            num_cpus: task.num_cpus,
            ram_mb: task.ram_mb,
            disk_mb: task.disk_mb,
            num_ports: task.requested_ports.len(),
        }
    }

    /// Subtracts the fixed executor overhead from an offered slot, bottoming
    /// out at zero.
    pub fn minus_executor_overhead(&self, cpu: f64, ram_mb: u64) -> Self {
        Self {
            num_cpus: (self.num_cpus - cpu).max(0.0),
            ram_mb: self.ram_mb.saturating_sub(ram_mb),
            disk_mb: self.disk_mb,
            num_ports: self.num_ports,
        }
    }
}

/// Resource allotment for a role. Only production tasks draw against it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quota {
    pub num_cpus: f64,
    pub ram_mb: u64,
    pub disk_mb: u64,
}

impl Quota {
    pub fn new(num_cpus: f64, ram_mb: u64, disk_mb: u64) -> Self {
        Self {
            num_cpus,
            ram_mb,
            disk_mb,
        }
    }
}
