use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::base::job_key::JobKey;
use crate::model::task::TaskConfig;

/// The old and new configuration of one shard within a rolling update.
/// `old_config` is absent for shards added by the update; `new_config` is
/// absent for shards it removes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdateConfiguration {
    pub old_config: Option<TaskConfig>,
    pub new_config: Option<TaskConfig>,
}

/// A registered rolling update for one job, bound to an opaque token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdateConfiguration {
    pub job_key: JobKey,
    pub update_token: String,
    pub configs: BTreeMap<u32, TaskUpdateConfiguration>,
}

impl JobUpdateConfiguration {
    /// The target config for a shard when rolling in the given direction.
    pub fn target_config(&self, shard: u32, rolling_forward: bool) -> Option<&TaskConfig> {
        self.configs.get(&shard).and_then(|c| {
            if rolling_forward {
                c.new_config.as_ref()
            } else {
                c.old_config.as_ref()
            }
        })
    }
}

/// Outcome of an update applied to a single shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardUpdateResult {
    /// The shard's task is being killed and will restart on the target config.
    Restarting,
    /// No task was active; a new one was inserted.
    Added,
    /// The active task already matches the target config.
    Unchanged,
    /// The shard has no target config in this direction; its task was killed.
    Completed,
}

/// Overall outcome recorded when an update is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateResult {
    Success,
    Failed,
    Terminated,
}
