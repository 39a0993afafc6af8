//! Shared helpers over scheduled tasks: status sets and scheduling order.

use std::cmp::Ordering;

use crate::model::task::{ScheduledTask, TaskStatus};

/// Every status a live task can hold; complement of the terminal set.
pub const ACTIVE_STATES: &[TaskStatus] = &[
    TaskStatus::Init,
    TaskStatus::Pending,
    TaskStatus::Assigned,
    TaskStatus::Starting,
    TaskStatus::Running,
    TaskStatus::Killing,
    TaskStatus::Preempting,
    TaskStatus::Updating,
    TaskStatus::Rollback,
    TaskStatus::Restarting,
];

pub const TERMINAL_STATES: &[TaskStatus] = &[
    TaskStatus::Finished,
    TaskStatus::Failed,
    TaskStatus::Killed,
    TaskStatus::Lost,
];

/// Timestamp of the first recorded event, used as the task's age.
pub fn first_event_timestamp(task: &ScheduledTask) -> i64 {
    task.task_events.first().map(|e| e.timestamp_ms).unwrap_or(0)
}

/// Timestamp of the most recent event.
pub fn latest_event_timestamp(task: &ScheduledTask) -> i64 {
    task.task_events.last().map(|e| e.timestamp_ms).unwrap_or(0)
}

/// Scheduling order: higher priority first, then production before
/// non-production, then older first, with the task id as the stable
/// tie-breaker so ordering is reproducible.
pub fn scheduling_order(a: &ScheduledTask, b: &ScheduledTask) -> Ordering {
    b.config()
        .priority
        .cmp(&a.config().priority)
        .then_with(|| b.config().production.cmp(&a.config().production))
        .then_with(|| first_event_timestamp(a).cmp(&first_event_timestamp(b)))
        .then_with(|| a.task_id().cmp(b.task_id()))
}

/// Sorts tasks for scheduling; the sort is stable by construction of the
/// comparator's total tie-break on task id.
pub fn sort_for_scheduling(tasks: &mut [ScheduledTask]) {
    tasks.sort_by(scheduling_order);
}

/// Reverse scheduling order: cheapest-to-preempt first.
pub fn sort_for_preemption(tasks: &mut [ScheduledTask]) {
    tasks.sort_by(|a, b| scheduling_order(b, a));
}
