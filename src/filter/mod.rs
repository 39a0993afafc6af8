//! Decides whether a task may occupy a slot on a host.
//!
//! The filter is a union of independent checks (resources, ports,
//! maintenance, constraints, dedicated hosts); order never matters and an
//! empty result means the placement is allowed.

pub mod constraint_filter;
pub mod notifying;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::base::query::TaskQuery;
use crate::model::attributes::{HostAttributes, MaintenanceMode};
use crate::model::constraints::DEDICATED_ATTRIBUTE;
use crate::model::resources::Resources;
use crate::model::task::TaskConfig;
use crate::storage::Storage;

pub use notifying::NotifyingSchedulingFilter;

/// Ceiling for veto scores. A veto at this score is "hard": no amount of
/// preemption can overcome it.
pub const MAX_SCORE: u32 = 1000;

/// One reason a placement was refused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Veto {
    pub reason: String,
    pub score: u32,
}

impl Veto {
    pub fn hard(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            score: MAX_SCORE,
        }
    }

    pub fn insufficient(resource: &str) -> Self {
        Veto::hard(format!("Insufficient {resource}"))
    }

    pub fn constraint_mismatch(name: &str) -> Self {
        Veto::hard(format!("Constraint not satisfied: {name}"))
    }

    pub fn unsatisfied_limit(name: &str) -> Self {
        Veto::hard(format!("Limit not satisfied: {name}"))
    }

    pub fn maintenance(mode: MaintenanceMode) -> Self {
        Veto::hard(format!(
            "Host {} for maintenance",
            mode.to_string().to_lowercase()
        ))
    }

    pub fn is_hard(&self) -> bool {
        self.score >= MAX_SCORE
    }
}

/// Scores a task against an offered slot. Two calls with identical inputs
/// produce equal veto sets.
pub trait SchedulingFilter: Send + Sync {
    fn filter(
        &self,
        slot: &Resources,
        host: &str,
        task: &TaskConfig,
        task_id: &str,
    ) -> BTreeSet<Veto>;
}

/// Production filter backed by storage for host attributes and the active
/// tasks needed by limit constraints. Reads are weakly consistent; the
/// offer-matching hot path must not serialize behind writers.
pub struct SchedulingFilterImpl {
    storage: Arc<Storage>,
}

impl SchedulingFilterImpl {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    fn resource_vetoes(slot: &Resources, task: &TaskConfig) -> BTreeSet<Veto> {
        let required = Resources::from_task(task);
        let mut vetoes = BTreeSet::new();
        if slot.num_cpus < required.num_cpus {
            vetoes.insert(Veto::insufficient("CPU"));
        }
        if slot.ram_mb < required.ram_mb {
            vetoes.insert(Veto::insufficient("RAM"));
        }
        if slot.disk_mb < required.disk_mb {
            vetoes.insert(Veto::insufficient("disk"));
        }
        if slot.num_ports < required.num_ports {
            vetoes.insert(Veto::insufficient("ports"));
        }
        vetoes
    }

    fn maintenance_veto(attributes: &HostAttributes) -> Option<Veto> {
        match attributes.maintenance_mode {
            MaintenanceMode::Draining | MaintenanceMode::Drained => {
                Some(Veto::maintenance(attributes.maintenance_mode))
            }
            MaintenanceMode::None | MaintenanceMode::Scheduled => None,
        }
    }

    /// A host carrying the dedicated attribute only accepts tasks whose own
    /// dedicated constraint names one of the host's dedicated values and
    /// whose owner role matches the value's `role/` prefix. Admission checks
    /// the prefix too, but the filter re-checks it so a config that bypassed
    /// admission cannot occupy another role's dedicated host.
    fn dedicated_veto(host_attributes: &HostAttributes, task: &TaskConfig) -> Option<Veto> {
        let host_dedicated = host_attributes.values_of(DEDICATED_ATTRIBUTE);
        if host_dedicated.is_empty() {
            return None;
        }
        let task_matches = task
            .constraints
            .iter()
            .filter(|c| c.name == DEDICATED_ATTRIBUTE)
            .any(|c| match &c.constraint {
                crate::model::constraints::TaskConstraint::Value { negated: false, values } => {
                    values.iter().any(|v| {
                        host_dedicated.contains(v)
                            && v.split('/').next() == Some(task.owner.role.as_str())
                    })
                }
                _ => false,
            });
        if task_matches {
            None
        } else {
            Some(Veto::constraint_mismatch(DEDICATED_ATTRIBUTE))
        }
    }
}

impl SchedulingFilter for SchedulingFilterImpl {
    fn filter(
        &self,
        slot: &Resources,
        host: &str,
        task: &TaskConfig,
        _task_id: &str,
    ) -> BTreeSet<Veto> {
        let mut vetoes = Self::resource_vetoes(slot, task);

        self.storage.weakly_consistent_read(|stores| {
            let host_attributes = stores
                .attribute_store
                .fetch_host_attributes(host)
                .unwrap_or_else(|| HostAttributes::new(host, []));

            if let Some(veto) = Self::maintenance_veto(&host_attributes) {
                vetoes.insert(veto);
            }
            if let Some(veto) = Self::dedicated_veto(&host_attributes, task) {
                vetoes.insert(veto);
            }

            let active_tasks = stores
                .task_store
                .fetch_tasks(&TaskQuery::job_scoped(&task.job_key()).active());
            let load_attributes =
                |h: &str| stores.attribute_store.fetch_host_attributes(h);

            for constraint in &task.constraints {
                if let Some(veto) = constraint_filter::evaluate(
                    constraint,
                    &host_attributes,
                    &active_tasks,
                    &load_attributes,
                ) {
                    vetoes.insert(veto);
                }
            }
        });

        vetoes
    }
}
