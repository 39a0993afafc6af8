use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::base::job_key::JobKey;
use crate::model::constraints::Constraint;

/// Status of a task within its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Created but not yet saved as runnable.
    Init,
    /// Waiting for a suitable slot.
    Pending,
    /// Matched to a slot; ports and host are now fixed.
    Assigned,
    /// The executor acknowledged the task and is preparing it.
    Starting,
    /// The task process is running.
    Running,
    /// Ran to completion with a zero exit.
    Finished,
    /// The process exited abnormally.
    Failed,
    /// A kill was requested and is in flight.
    Killing,
    /// Killed by request.
    Killed,
    /// Being killed to free its slot for higher-priority pending work.
    Preempting,
    /// Being killed as part of a rolling update.
    Updating,
    /// Being killed to roll a shard back to its previous configuration.
    Rollback,
    /// Being killed at user request with the intent to restart.
    Restarting,
    /// The cluster manager lost track of the task.
    Lost,
    /// Reported by the driver for ids the scheduler does not track.
    Unknown,
}

impl TaskStatus {
    /// Terminal statuses permit no further transitions, only deletion.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Killed | TaskStatus::Lost
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != TaskStatus::Unknown
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Init => "INIT",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::Starting => "STARTING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Killing => "KILLING",
            TaskStatus::Killed => "KILLED",
            TaskStatus::Preempting => "PREEMPTING",
            TaskStatus::Updating => "UPDATING",
            TaskStatus::Rollback => "ROLLBACK",
            TaskStatus::Restarting => "RESTARTING",
            TaskStatus::Lost => "LOST",
            TaskStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

/// Job owner identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub role: String,
    pub user: String,
}

impl Identity {
    pub fn new(role: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            user: user.into(),
        }
    }
}

/// Immutable description of a single task. Once a task is persisted none of
/// these fields may change except through the unsafe in-place replace path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub owner: Identity,
    pub environment: String,
    pub job_name: String,
    pub shard_id: u32,
    pub num_cpus: f64,
    pub ram_mb: u64,
    pub disk_mb: u64,
    pub requested_ports: BTreeSet<String>,
    pub constraints: BTreeSet<Constraint>,
    pub is_service: bool,
    pub production: bool,
    pub priority: i32,
    pub max_task_failures: u32,
    pub contact_email: Option<String>,
    /// Opaque payload handed to the executor; the core never interprets it.
    pub executor_config: Vec<u8>,
    pub task_links: BTreeMap<String, String>,
}

impl TaskConfig {
    /// The job coordinate is derived, never stored.
    pub fn job_key(&self) -> JobKey {
        JobKey::new(
            self.owner.role.clone(),
            self.environment.clone(),
            self.job_name.clone(),
        )
    }
}

/// A task matched to a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedTask {
    pub task_id: String,
    pub task: TaskConfig,
    pub slave_host: Option<String>,
    pub slave_id: Option<String>,
    /// Port name to concrete port; keys are a subset of `requested_ports`
    /// and fixed once the task reaches ASSIGNED.
    pub assigned_ports: BTreeMap<String, u16>,
}

impl AssignedTask {
    pub fn unassigned(task_id: impl Into<String>, task: TaskConfig) -> Self {
        Self {
            task_id: task_id.into(),
            task,
            slave_host: None,
            slave_id: None,
            assigned_ports: BTreeMap::new(),
        }
    }
}

/// One entry in a task's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub timestamp_ms: i64,
    pub status: TaskStatus,
    pub message: Option<String>,
}

impl TaskEvent {
    pub fn new(timestamp_ms: i64, status: TaskStatus) -> Self {
        Self {
            timestamp_ms,
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A task plus its scheduling state and audit trail.
///
/// Invariants: `status` always equals the status of the last task event, the
/// event list is non-empty once the task exists, and event timestamps are
/// non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub assigned_task: AssignedTask,
    pub status: TaskStatus,
    pub task_events: Vec<TaskEvent>,
    /// Id of the task this one was rescheduled from, if any.
    pub ancestor_task_id: Option<String>,
    pub failure_count: u32,
}

impl ScheduledTask {
    pub fn task_id(&self) -> &str {
        &self.assigned_task.task_id
    }

    pub fn config(&self) -> &TaskConfig {
        &self.assigned_task.task
    }

    pub fn job_key(&self) -> JobKey {
        self.assigned_task.task.job_key()
    }

    pub fn shard_id(&self) -> u32 {
        self.assigned_task.task.shard_id
    }

    pub fn latest_event(&self) -> Option<&TaskEvent> {
        self.task_events.last()
    }
}
