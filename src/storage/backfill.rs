//! Startup repair pass run before the scheduler goes live.

use std::collections::{BTreeSet, HashMap};

use crate::base::job_key::JobKey;
use crate::base::query::TaskQuery;
use crate::configuration;
use crate::model::task::{TaskEvent, TaskStatus};
use crate::stats;
use crate::storage::Stores;
use crate::ports::clock::Clock;

/// Backfills storage to match assumptions that may have changed since the
/// state was written: re-applies configuration defaults, synthesizes a task
/// event when a task's status has no matching event, and repairs shard
/// uniqueness by killing all but the lexicographically greatest active task
/// id in each (job, shard).
pub fn backfill(stores: &mut Stores, clock: &dyn Clock) {
    for manager_id in stores.job_store.fetch_manager_ids() {
        for mut job in stores.job_store.fetch_jobs(&manager_id) {
            configuration::apply_task_defaults(&mut job.task_config);
            stores.job_store.save_accepted_job(&manager_id, job);
        }
    }

    let victims = duplicate_shard_victims(stores);
    let now = clock.now_millis();

    tracing::info!("Performing shard uniqueness sanity check");
    stores.task_store.mutate_tasks(&TaskQuery::unscoped(), |task| {
        configuration::apply_task_defaults(&mut task.assigned_task.task);

        let missing_event = task
            .task_events
            .last()
            .map(|event| event.status != task.status)
            .unwrap_or(true);
        if missing_event {
            tracing::error!(
                task_id = %task.task_id(),
                status = %task.status,
                "Task has no event for current status"
            );
            task.task_events.push(
                TaskEvent::new(now, task.status).with_message("Synthesized missing event."),
            );
        }

        if victims.contains(task.task_id()) {
            task.status = TaskStatus::Killed;
            task.task_events.push(
                TaskEvent::new(now, TaskStatus::Killed).with_message("Killed duplicate shard."),
            );
        }
    });
}

/// Ids of active tasks that violate shard uniqueness, keeping the greatest
/// id of each offending group in the hope that it is legitimately running.
fn duplicate_shard_victims(stores: &Stores) -> BTreeSet<String> {
    let active = stores
        .task_store
        .fetch_tasks(&TaskQuery::unscoped().active());

    let mut by_shard: HashMap<(JobKey, u32), BTreeSet<String>> = HashMap::new();
    for task in &active {
        by_shard
            .entry((task.job_key(), task.shard_id()))
            .or_default()
            .insert(task.task_id().to_string());
    }

    let mut victims = BTreeSet::new();
    for ((job_key, shard_id), ids) in by_shard {
        if ids.len() > 1 {
            stats::bump_shard_sanity_check_failures();
            tracing::error!(
                job = %job_key,
                shard_id,
                active = ?ids,
                "Active shard sanity check failed"
            );
            let keep = ids.iter().next_back().cloned().expect("non-empty group");
            victims.extend(ids.into_iter().filter(|id| *id != keep));
        }
    }
    victims
}
