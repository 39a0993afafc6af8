//! State machine and state manager behavior.


use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use armada::base::query::TaskQuery;
use armada::events::SchedulerEvent;
use armada::model::task::TaskStatus;
use armada::model::update::{ShardUpdateResult, UpdateResult};

use test_harness::{job_key, task_config, Harness};

#[test]
fn insert_creates_pending_task_with_event_trail() {
    let harness = Harness::new();
    let id = harness.insert_task(task_config("jim", "myJob", 0));

    let task = harness.fetch_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.task_events.len(), 2);
    assert_eq!(task.task_events[0].status, TaskStatus::Init);
    assert_eq!(task.task_events[1].status, TaskStatus::Pending);
    assert_eq!(task.failure_count, 0);
    assert!(task.ancestor_task_id.is_none());
}

#[test]
fn kill_pending_task_deletes_it() {
    let harness = Harness::new();
    let deleted = Arc::new(AtomicUsize::new(0));
    let deleted_probe = deleted.clone();
    harness.bus.subscribe(move |event| {
        if let SchedulerEvent::TasksDeleted { tasks } = event {
            deleted_probe.fetch_add(tasks.len(), Ordering::SeqCst);
        }
    });

    let id = harness.insert_task(task_config("jim", "myJob", 0));
    assert_eq!(harness.change_state(&id, TaskStatus::Killing), 1);
    assert!(harness.fetch_task(&id).is_none());
    assert_eq!(deleted.load(Ordering::SeqCst), 1);

    // The task no longer exists, so a second kill changes nothing.
    assert_eq!(harness.change_state(&id, TaskStatus::Killing), 0);
    // No process ever ran; the driver is never told to kill.
    assert!(harness.driver.kills().is_empty());
}

#[test]
fn unknown_report_drops_task_awaiting_kill() {
    let harness = Harness::new();
    let id = harness.insert_task(task_config("jim", "myJob", 0));
    harness.assign(&id, "host_a");
    harness.walk(&id, &[TaskStatus::Starting, TaskStatus::Running, TaskStatus::Killing]);
    assert_eq!(harness.driver.kills(), vec![id.clone()]);

    assert_eq!(harness.change_state(&id, TaskStatus::Unknown), 1);
    assert!(harness.fetch_task(&id).is_none());
}

#[test]
fn unknown_report_for_live_task_is_ignored() {
    let harness = Harness::new();
    let id = harness.insert_task(task_config("jim", "myJob", 0));
    harness.assign(&id, "host_a");
    harness.walk(&id, &[TaskStatus::Starting, TaskStatus::Running]);

    assert_eq!(harness.change_state(&id, TaskStatus::Unknown), 0);
    assert_eq!(harness.task_status(&id), Some(TaskStatus::Running));
}

#[test]
fn illegal_transition_leaves_task_unchanged() {
    let harness = Harness::new();
    let id = harness.insert_task(task_config("jim", "myJob", 0));
    let before = harness.fetch_task(&id).unwrap();

    assert_eq!(harness.change_state(&id, TaskStatus::Running), 0);
    assert_eq!(harness.change_state(&id, TaskStatus::Finished), 0);

    let after = harness.fetch_task(&id).unwrap();
    assert_eq!(before, after);
}

#[test]
fn status_always_matches_last_event() {
    let harness = Harness::new();
    let id = harness.insert_task(task_config("jim", "myJob", 0));
    harness.assign(&id, "host_a");
    harness.clock.advance(std::time::Duration::from_secs(1));
    harness.walk(
        &id,
        &[TaskStatus::Starting, TaskStatus::Running, TaskStatus::Finished],
    );

    let task = harness.fetch_task(&id).unwrap();
    assert_eq!(task.status, task.task_events.last().unwrap().status);
    let timestamps: Vec<i64> = task.task_events.iter().map(|e| e.timestamp_ms).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted, "event timestamps must be non-decreasing");
}

#[test]
fn failed_task_reschedules_until_failure_limit() {
    let harness = Harness::new();
    let mut config = task_config("jim", "myJob", 0);
    config.max_task_failures = 2;

    let id = harness.insert_task(config);
    harness.assign(&id, "host_a");
    harness.walk(&id, &[TaskStatus::Starting, TaskStatus::Running, TaskStatus::Failed]);

    let successors = harness.fetch_tasks(&TaskQuery::job_scoped(&job_key("jim", "myJob")).active());
    assert_eq!(successors.len(), 1);
    let successor = &successors[0];
    assert_eq!(successor.status, TaskStatus::Pending);
    assert_eq!(successor.failure_count, 1);
    assert_eq!(successor.ancestor_task_id.as_deref(), Some(id.as_str()));

    // Second failure: count 1 < max 2 still reschedules.
    let second = successor.task_id().to_string();
    harness.assign(&second, "host_a");
    harness.walk(&second, &[TaskStatus::Starting, TaskStatus::Running, TaskStatus::Failed]);
    let third: Vec<_> = harness
        .fetch_tasks(&TaskQuery::job_scoped(&job_key("jim", "myJob")).active());
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].failure_count, 2);

    // Third failure exhausts the limit.
    let third_id = third[0].task_id().to_string();
    harness.assign(&third_id, "host_a");
    harness.walk(&third_id, &[TaskStatus::Starting, TaskStatus::Running, TaskStatus::Failed]);
    assert!(harness
        .fetch_tasks(&TaskQuery::job_scoped(&job_key("jim", "myJob")).active())
        .is_empty());
}

#[test]
fn finished_service_task_reschedules() {
    let harness = Harness::new();
    let mut config = task_config("jim", "webservice", 0);
    config.is_service = true;

    let id = harness.insert_task(config);
    harness.assign(&id, "host_a");
    harness.walk(&id, &[TaskStatus::Starting, TaskStatus::Running, TaskStatus::Finished]);

    let active = harness.fetch_tasks(&TaskQuery::job_scoped(&job_key("jim", "webservice")).active());
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].failure_count, 0);
    assert_eq!(active[0].ancestor_task_id.as_deref(), Some(id.as_str()));
}

#[test]
fn killed_service_task_does_not_reschedule_after_user_kill() {
    let harness = Harness::new();
    let mut config = task_config("jim", "webservice", 0);
    config.is_service = true;

    let id = harness.insert_task(config);
    harness.assign(&id, "host_a");
    harness.walk(
        &id,
        &[TaskStatus::Starting, TaskStatus::Running, TaskStatus::Killing, TaskStatus::Killed],
    );

    assert!(harness
        .fetch_tasks(&TaskQuery::job_scoped(&job_key("jim", "webservice")).active())
        .is_empty());
}

#[test]
fn restarting_task_reschedules_when_killed() {
    let harness = Harness::new();
    let id = harness.insert_task(task_config("jim", "myJob", 0));
    harness.assign(&id, "host_a");
    harness.walk(
        &id,
        &[TaskStatus::Starting, TaskStatus::Running, TaskStatus::Restarting],
    );
    assert_eq!(harness.driver.kills(), vec![id.clone()]);

    harness.walk(&id, &[TaskStatus::Killed]);
    let active = harness.fetch_tasks(&TaskQuery::job_scoped(&job_key("jim", "myJob")).active());
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].ancestor_task_id.as_deref(), Some(id.as_str()));
}

#[test]
fn lost_task_reschedules() {
    let harness = Harness::new();
    let id = harness.insert_task(task_config("jim", "myJob", 0));
    harness.assign(&id, "host_a");
    harness.walk(&id, &[TaskStatus::Starting, TaskStatus::Running, TaskStatus::Lost]);

    let active = harness.fetch_tasks(&TaskQuery::job_scoped(&job_key("jim", "myJob")).active());
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].status, TaskStatus::Pending);
}

#[test]
fn nested_state_change_from_subscriber_is_delivered_in_order() {
    let harness = Harness::new();
    let order: Arc<Mutex<Vec<(TaskStatus, TaskStatus)>>> = Arc::new(Mutex::new(Vec::new()));

    let state_manager = harness.state_manager.clone();
    let order_probe = order.clone();
    let triggered = Arc::new(AtomicBool::new(false));
    harness.bus.subscribe(move |event| {
        if let SchedulerEvent::TaskStateChange { task, old_status } = event {
            order_probe.lock().unwrap().push((*old_status, task.status));
            if task.status == TaskStatus::Pending && !triggered.swap(true, Ordering::SeqCst) {
                // Drive a follow-up transition from inside the callback.
                state_manager.change_state(
                    &TaskQuery::by_id(task.task_id()),
                    TaskStatus::Assigned,
                    None,
                );
            }
        }
    });

    harness.insert_task(task_config("jim", "myJob", 0));

    let seen = order.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (TaskStatus::Init, TaskStatus::Pending),
            (TaskStatus::Pending, TaskStatus::Assigned),
        ]
    );
}

#[test]
fn finish_update_requires_registered_update() {
    let harness = Harness::new();
    let key = job_key("jim", "myJob");
    harness.insert_task(task_config("jim", "myJob", 0));

    let err = harness
        .state_manager
        .finish_update(&key, "jim-user", None, UpdateResult::Success, true)
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"));

    let token = harness
        .state_manager
        .register_update(&key, vec![task_config("jim", "myJob", 0)])
        .unwrap();
    assert!(harness
        .state_manager
        .finish_update(&key, "jim-user", Some(&token), UpdateResult::Success, true)
        .unwrap());

    // The update is gone; a non-expecting finish is an idempotent no-op.
    assert!(!harness
        .state_manager
        .finish_update(&key, "jim-user", Some(&token), UpdateResult::Success, false)
        .unwrap());
}

#[test]
fn modify_shards_rejects_bad_token() {
    let harness = Harness::new();
    let key = job_key("jim", "myJob");
    harness.insert_task(task_config("jim", "myJob", 0));

    harness
        .state_manager
        .register_update(&key, vec![task_config("jim", "myJob", 0)])
        .unwrap();
    let err = harness
        .state_manager
        .modify_shards(&key, "jim-user", [0], "wrong-token", true)
        .unwrap_err();
    assert!(err.to_string().contains("Invalid update token"));
}

#[test]
fn modify_shards_with_unknown_shard_changes_nothing() {
    let harness = Harness::new();
    let key = job_key("jim", "myJob");

    let id = harness.insert_task(task_config("jim", "myJob", 0));
    harness.assign(&id, "host_a");
    harness.walk(&id, &[TaskStatus::Starting, TaskStatus::Running]);

    let mut updated_config = task_config("jim", "myJob", 0);
    updated_config.num_cpus = 1000.0;
    let token = harness
        .state_manager
        .register_update(&key, vec![updated_config])
        .unwrap();

    harness.driver.clear();
    // Shard 7 was never part of the update; the whole call must abort
    // before shard 0 is touched.
    let err = harness
        .state_manager
        .modify_shards(&key, "jim-user", [0, 7], &token, true)
        .unwrap_err();
    assert!(err.to_string().contains("No update configuration for shard 7"));

    assert_eq!(harness.task_status(&id), Some(TaskStatus::Running));
    assert!(harness.driver.kills().is_empty());
}

#[test]
fn modify_shards_reports_unchanged_for_identical_config() {
    let harness = Harness::new();
    let key = job_key("jim", "myJob");
    harness.insert_task(task_config("jim", "myJob", 0));

    // The "new" config is identical to the running one.
    let token = harness
        .state_manager
        .register_update(&key, vec![task_config("jim", "myJob", 0)])
        .unwrap();
    let results = harness
        .state_manager
        .modify_shards(&key, "jim-user", [0], &token, true)
        .unwrap();
    assert_eq!(results[&0], ShardUpdateResult::Unchanged);
}

#[test]
fn rolling_update_and_rollback_recreate_shards() {
    let harness = Harness::new();
    let key = job_key("jim", "myJob");

    let id = harness.insert_task(task_config("jim", "myJob", 0));
    harness.assign(&id, "host_a");
    harness.walk(&id, &[TaskStatus::Starting, TaskStatus::Running]);

    let mut updated_config = task_config("jim", "myJob", 0);
    updated_config.num_cpus = 1000.0;
    let token = harness
        .state_manager
        .register_update(&key, vec![updated_config.clone()])
        .unwrap();

    // Roll forward: the running task starts dying as UPDATING.
    let results = harness
        .state_manager
        .modify_shards(&key, "jim-user", [0], &token, true)
        .unwrap();
    assert_eq!(results[&0], ShardUpdateResult::Restarting);
    assert_eq!(harness.task_status(&id), Some(TaskStatus::Updating));
    assert_eq!(harness.driver.kills(), vec![id.clone()]);

    // While a shard is mid-update the update cannot be finished.
    let err = harness
        .state_manager
        .finish_update(&key, "jim-user", None, UpdateResult::Success, true)
        .unwrap_err();
    assert!(err.to_string().contains("in progress"));

    // The old task terminates; its successor runs the new config.
    harness.walk(&id, &[TaskStatus::Finished]);
    let active = harness.fetch_tasks(&TaskQuery::job_scoped(&key).active());
    assert_eq!(active.len(), 1);
    let updated_id = active[0].task_id().to_string();
    assert_eq!(active[0].config().num_cpus, 1000.0);
    assert_eq!(active[0].status, TaskStatus::Pending);

    // Roll the new task back; its successor restores the original config.
    harness.assign(&updated_id, "host_a");
    harness.walk(&updated_id, &[TaskStatus::Starting]);
    let results = harness
        .state_manager
        .modify_shards(&key, "jim-user", [0], &token, false)
        .unwrap();
    assert_eq!(results[&0], ShardUpdateResult::Restarting);
    assert_eq!(harness.task_status(&updated_id), Some(TaskStatus::Rollback));

    let err = harness
        .state_manager
        .finish_update(&key, "jim-user", None, UpdateResult::Success, true)
        .unwrap_err();
    assert!(err.to_string().contains("in progress"));

    harness.walk(&updated_id, &[TaskStatus::Finished]);
    let rolled_back = harness.fetch_tasks(&TaskQuery::job_scoped(&key).active());
    assert_eq!(rolled_back.len(), 1);
    assert_eq!(rolled_back[0].config().num_cpus, 1.0);

    assert!(harness
        .state_manager
        .finish_update(&key, "jim-user", None, UpdateResult::Success, true)
        .unwrap());
}

#[test]
fn register_update_refuses_second_registration() {
    let harness = Harness::new();
    let key = job_key("jim", "myJob");
    harness.insert_task(task_config("jim", "myJob", 0));

    harness
        .state_manager
        .register_update(&key, vec![task_config("jim", "myJob", 0)])
        .unwrap();
    let err = harness
        .state_manager
        .register_update(&key, vec![task_config("jim", "myJob", 0)])
        .unwrap_err();
    assert!(err.to_string().contains("already in progress"));
}

#[test]
fn delete_tasks_publishes_deletion() {
    let harness = Harness::new();
    let deleted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let deleted_probe = deleted.clone();
    harness.bus.subscribe(move |event| {
        if let SchedulerEvent::TasksDeleted { tasks } = event {
            deleted_probe
                .lock()
                .unwrap()
                .extend(tasks.iter().map(|t| t.task_id().to_string()));
        }
    });

    let id = harness.insert_task(task_config("jim", "myJob", 0));
    harness.state_manager.delete_tasks([id.clone()]);
    assert!(harness.fetch_task(&id).is_none());
    assert_eq!(deleted.lock().unwrap().clone(), vec![id]);
}
