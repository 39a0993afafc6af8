use serde::{Deserialize, Serialize};

use crate::base::job_key::JobKey;
use crate::model::task::{Identity, TaskConfig};

/// What to do when a cron job fires while tasks from a prior run are still
/// active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CronCollisionPolicy {
    /// Kill the prior run, waiting for it to terminate before launching.
    #[default]
    KillExisting,
    /// Drop the new run.
    CancelNew,
    /// Launch alongside the prior run. Inserted shard ids are shifted past
    /// the existing ones, so they exceed `shard_count`; accepted quirk of
    /// keeping (job, shard) unique across overlapping runs.
    RunOverlap,
}

/// A job: a task template plus cardinality and optional cron schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub key: JobKey,
    pub owner: Identity,
    pub task_config: TaskConfig,
    pub shard_count: u32,
    pub cron_schedule: Option<String>,
    pub cron_collision_policy: Option<CronCollisionPolicy>,
}

impl JobConfiguration {
    pub fn is_cron(&self) -> bool {
        self.cron_schedule
            .as_deref()
            .is_some_and(|s| !s.is_empty())
    }

    pub fn collision_policy(&self) -> CronCollisionPolicy {
        self.cron_collision_policy.unwrap_or_default()
    }

    /// Materializes the per-shard task configs, shards `0..shard_count`.
    pub fn task_configs(&self) -> Vec<TaskConfig> {
        (0..self.shard_count)
            .map(|shard| {
                let mut config = self.task_config.clone();
                config.shard_id = shard;
                config
            })
            .collect()
    }
}
