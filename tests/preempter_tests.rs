//! Preemption passes: eligibility, ordering, and host reservations.


use std::time::Duration;

use armada::base::query::TaskQuery;
use armada::model::task::{TaskConfig, TaskStatus};

use test_harness::{offer, task_config, Harness};

fn pending_candidate(harness: &Harness, config: TaskConfig) -> String {
    let id = harness.insert_task(config);
    // Candidates must idle in PENDING past the candidacy delay.
    harness
        .clock
        .advance(harness.config.preemption_candidacy_delay + Duration::from_secs(1));
    id
}

fn running_victim(harness: &Harness, config: TaskConfig, host: &str) -> String {
    let id = harness.insert_task(config);
    harness.assign(&id, host);
    harness.walk(&id, &[TaskStatus::Starting, TaskStatus::Running]);
    id
}

#[test]
fn higher_priority_same_role_preempts() {
    let harness = Harness::new();

    let mut victim_config = task_config("r1", "victimJob", 0);
    victim_config.priority = 1;
    let victim = running_victim(&harness, victim_config, "hostA");

    let mut candidate_config = task_config("r1", "candidateJob", 0);
    candidate_config.priority = 5;
    let candidate = pending_candidate(&harness, candidate_config);

    harness.driver.clear();
    harness.preempter.run_once();

    assert_eq!(harness.task_status(&victim), Some(TaskStatus::Preempting));
    assert_eq!(harness.task_status(&candidate), Some(TaskStatus::Pending));
    assert_eq!(harness.driver.kills(), vec![victim.clone()]);

    // A second pass must not preempt anything else.
    harness.driver.clear();
    harness.preempter.run_once();
    assert!(harness.driver.kills().is_empty());
}

#[test]
fn young_pending_tasks_may_not_preempt() {
    let harness = Harness::new();

    let mut victim_config = task_config("r1", "victimJob", 0);
    victim_config.priority = 1;
    let victim = running_victim(&harness, victim_config, "hostA");

    let mut candidate_config = task_config("r1", "candidateJob", 0);
    candidate_config.priority = 5;
    harness.insert_task(candidate_config);

    harness.preempter.run_once();
    assert_eq!(harness.task_status(&victim), Some(TaskStatus::Running));
}

#[test]
fn production_preempts_nonproduction_across_roles() {
    let harness = Harness::new();

    let victim = running_victim(&harness, task_config("r1", "batchJob", 0), "hostA");

    let mut candidate_config = task_config("r2", "prodJob", 0);
    candidate_config.production = true;
    pending_candidate(&harness, candidate_config);

    harness.preempter.run_once();
    assert_eq!(harness.task_status(&victim), Some(TaskStatus::Preempting));
}

#[test]
fn equal_priority_does_not_preempt() {
    let harness = Harness::new();

    let mut victim_config = task_config("r1", "victimJob", 0);
    victim_config.priority = 3;
    let victim = running_victim(&harness, victim_config, "hostA");

    let mut candidate_config = task_config("r1", "candidateJob", 0);
    candidate_config.priority = 3;
    pending_candidate(&harness, candidate_config);

    harness.preempter.run_once();
    assert_eq!(harness.task_status(&victim), Some(TaskStatus::Running));
}

#[test]
fn victim_slot_ignores_host_slack() {
    // The candidate slot is sized from the victim's reservation alone, so a
    // bigger candidate cannot preempt even if the host could fit it.
    let harness = Harness::new();

    let mut victim_config = task_config("r1", "victimJob", 0);
    victim_config.priority = 1;
    victim_config.num_cpus = 1.0;
    let victim = running_victim(&harness, victim_config, "hostA");

    let mut candidate_config = task_config("r1", "candidateJob", 0);
    candidate_config.priority = 5;
    candidate_config.num_cpus = 2.0;
    pending_candidate(&harness, candidate_config);

    harness.preempter.run_once();
    assert_eq!(harness.task_status(&victim), Some(TaskStatus::Running));
}

#[test]
fn one_preemption_per_victim_per_cycle() {
    let harness = Harness::new();

    let mut victim_config = task_config("r1", "victimJob", 0);
    victim_config.priority = 1;
    let victim = running_victim(&harness, victim_config, "hostA");

    let mut first = task_config("r1", "candidates", 0);
    first.priority = 5;
    let mut second = task_config("r1", "candidates", 1);
    second.priority = 5;
    pending_candidate(&harness, first);
    pending_candidate(&harness, second);

    harness.driver.clear();
    harness.preempter.run_once();

    // One victim frees exactly one slot.
    assert_eq!(harness.driver.kills(), vec![victim]);
    let pending = harness.fetch_tasks(&TaskQuery::status_scoped([TaskStatus::Pending]));
    assert_eq!(pending.len(), 1);
}

#[test]
fn freed_host_is_reserved_for_the_candidate() {
    let harness = Harness::new();

    let mut victim_config = task_config("r1", "victimJob", 0);
    victim_config.priority = 1;
    let victim = running_victim(&harness, victim_config, "hostA");

    let mut candidate_config = task_config("r1", "candidateJob", 0);
    candidate_config.priority = 5;
    let candidate = pending_candidate(&harness, candidate_config);

    harness.preempter.run_once();
    assert_eq!(harness.task_status(&victim), Some(TaskStatus::Preempting));

    // A later, even higher-priority arrival must not steal the freed host.
    let mut interloper_config = task_config("r1", "interloperJob", 0);
    interloper_config.priority = 9;
    let interloper = harness.insert_task(interloper_config);

    harness.change_state(&victim, TaskStatus::Killed);
    harness.core.offer(&offer("offer-1", "hostA", 2.0, 2048, 2048));

    assert_eq!(harness.task_status(&candidate), Some(TaskStatus::Assigned));
    assert_eq!(harness.task_status(&interloper), Some(TaskStatus::Pending));

    // Other hosts schedule normally.
    harness.core.offer(&offer("offer-2", "hostB", 2.0, 2048, 2048));
    assert_eq!(harness.task_status(&interloper), Some(TaskStatus::Assigned));
}
