use std::collections::BTreeSet;

use crate::base::job_key::JobKey;
use crate::base::tasks;
use crate::model::task::{ScheduledTask, TaskStatus};

/// A declarative predicate over stored tasks. Unset fields match anything;
/// set fields are intersected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub task_ids: Option<BTreeSet<String>>,
    pub role: Option<String>,
    pub user: Option<String>,
    pub environment: Option<String>,
    pub job_name: Option<String>,
    pub shard_ids: Option<BTreeSet<u32>>,
    pub slave_host: Option<String>,
    pub statuses: Option<BTreeSet<TaskStatus>>,
}

impl TaskQuery {
    /// Matches every task.
    pub fn unscoped() -> Self {
        Self::default()
    }

    pub fn by_id(task_id: impl Into<String>) -> Self {
        Self::by_ids([task_id.into()])
    }

    pub fn by_ids(task_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            task_ids: Some(task_ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn job_scoped(key: &JobKey) -> Self {
        Self {
            role: Some(key.role.clone()),
            environment: Some(key.environment.clone()),
            job_name: Some(key.name.clone()),
            ..Self::default()
        }
    }

    pub fn shard_scoped(key: &JobKey, shards: impl IntoIterator<Item = u32>) -> Self {
        Self {
            shard_ids: Some(shards.into_iter().collect()),
            ..Self::job_scoped(key)
        }
    }

    pub fn role_scoped(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Self::default()
        }
    }

    pub fn host_scoped(host: impl Into<String>) -> Self {
        Self {
            slave_host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn status_scoped(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        Self {
            statuses: Some(statuses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Restricts the query to non-terminal statuses.
    pub fn active(mut self) -> Self {
        let active: BTreeSet<TaskStatus> = tasks::ACTIVE_STATES.iter().copied().collect();
        self.statuses = Some(match self.statuses {
            Some(statuses) => statuses.intersection(&active).copied().collect(),
            None => active,
        });
        self
    }

    /// The single job key this query resolves to, if it pins one.
    pub fn job_key_hint(&self) -> Option<JobKey> {
        match (&self.role, &self.environment, &self.job_name) {
            (Some(role), Some(env), Some(name)) => {
                Some(JobKey::new(role.clone(), env.clone(), name.clone()))
            }
            _ => None,
        }
    }

    pub fn matches(&self, task: &ScheduledTask) -> bool {
        let config = task.config();
        if let Some(ids) = &self.task_ids {
            if !ids.contains(task.task_id()) {
                return false;
            }
        }
        if let Some(role) = &self.role {
            if config.owner.role != *role {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if config.owner.user != *user {
                return false;
            }
        }
        if let Some(environment) = &self.environment {
            if config.environment != *environment {
                return false;
            }
        }
        if let Some(job_name) = &self.job_name {
            if config.job_name != *job_name {
                return false;
            }
        }
        if let Some(shards) = &self.shard_ids {
            if !shards.contains(&config.shard_id) {
                return false;
            }
        }
        if let Some(host) = &self.slave_host {
            if task.assigned_task.slave_host.as_deref() != Some(host.as_str()) {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_intersects_existing_statuses() {
        let query = TaskQuery::status_scoped([TaskStatus::Pending, TaskStatus::Finished]).active();
        let statuses = query.statuses.unwrap();
        assert!(statuses.contains(&TaskStatus::Pending));
        assert!(!statuses.contains(&TaskStatus::Finished));
    }

    #[test]
    fn job_key_hint_requires_all_components() {
        let key = JobKey::new("jim", "devel", "myJob");
        assert_eq!(TaskQuery::job_scoped(&key).job_key_hint(), Some(key));
        assert_eq!(TaskQuery::role_scoped("jim").job_key_hint(), None);
    }
}
