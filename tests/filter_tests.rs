//! Scheduling filter vetoes.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use armada::events::SchedulerEvent;
use armada::filter::{SchedulingFilter, Veto};
use armada::model::attributes::MaintenanceMode;
use armada::model::constraints::Constraint;
use armada::model::resources::Resources;
use armada::model::task::TaskStatus;

use test_harness::{task_config, Harness};

fn slot(cpus: f64, ram_mb: u64, disk_mb: u64, ports: usize) -> Resources {
    Resources::new(cpus, ram_mb, disk_mb, ports)
}

#[test]
fn sufficient_resources_pass() {
    let harness = Harness::new();
    let task = task_config("jim", "myJob", 0);
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "host_a", &task, "t1");
    assert!(vetoes.is_empty());
}

#[test]
fn exactly_equal_resources_pass() {
    let harness = Harness::new();
    let task = task_config("jim", "myJob", 0);
    let vetoes = harness
        .filter
        .filter(&slot(1.0, 1024, 1024, 0), "host_a", &task, "t1");
    assert!(vetoes.is_empty());
}

#[test]
fn insufficient_resources_are_hard_vetoes() {
    let harness = Harness::new();
    let task = task_config("jim", "myJob", 0);
    let vetoes = harness
        .filter
        .filter(&slot(0.5, 512, 512, 0), "host_a", &task, "t1");
    assert_eq!(vetoes.len(), 3);
    assert!(vetoes.iter().all(Veto::is_hard));
    assert!(vetoes.contains(&Veto::insufficient("CPU")));
    assert!(vetoes.contains(&Veto::insufficient("RAM")));
    assert!(vetoes.contains(&Veto::insufficient("disk")));
}

#[test]
fn too_few_ports_veto() {
    let harness = Harness::new();
    let mut task = task_config("jim", "myJob", 0);
    task.requested_ports = ["http".to_string(), "admin".to_string()]
        .into_iter()
        .collect();
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 1), "host_a", &task, "t1");
    assert!(vetoes.contains(&Veto::insufficient("ports")));
}

#[test]
fn draining_host_is_vetoed() {
    let harness = Harness::new();
    harness.save_host_attributes("host_a", [("rack", "r1")]);
    harness.storage.write(|stores| {
        stores
            .attribute_store
            .set_maintenance_mode("host_a", MaintenanceMode::Draining);
    });

    let task = task_config("jim", "myJob", 0);
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "host_a", &task, "t1");
    assert!(vetoes.contains(&Veto::maintenance(MaintenanceMode::Draining)));

    // SCHEDULED maintenance still accepts work.
    harness.storage.write(|stores| {
        stores
            .attribute_store
            .set_maintenance_mode("host_a", MaintenanceMode::Scheduled);
    });
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "host_a", &task, "t1");
    assert!(vetoes.is_empty());
}

#[test]
fn value_constraint_matches_host_attribute() {
    let harness = Harness::new();
    harness.save_host_attributes("host_a", [("rack", "r1")]);

    let mut task = task_config("jim", "myJob", 0);
    task.constraints
        .insert(Constraint::value("rack", ["r1".to_string()]));
    assert!(harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "host_a", &task, "t1")
        .is_empty());

    let mut task = task_config("jim", "myJob", 0);
    task.constraints
        .insert(Constraint::value("rack", ["r2".to_string()]));
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "host_a", &task, "t1");
    assert!(vetoes.contains(&Veto::constraint_mismatch("rack")));
}

#[test]
fn rack_limit_counts_tasks_per_rack() {
    let harness = Harness::new();
    harness.save_host_attributes("host1", [("rack", "r1")]);
    harness.save_host_attributes("host2", [("rack", "r1")]);
    harness.save_host_attributes("host3", [("rack", "r2")]);

    // One task of the job already runs in rack r1.
    let mut running = task_config("jim", "myJob", 0);
    running.constraints.insert(Constraint::rack_limit(1));
    let id = harness.insert_task(running);
    harness.assign(&id, "host1");
    harness.walk(&id, &[TaskStatus::Starting, TaskStatus::Running]);

    let mut candidate = task_config("jim", "myJob", 1);
    candidate.constraints.insert(Constraint::rack_limit(1));

    // Same rack: the limit of one is already consumed.
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "host2", &candidate, "t2");
    assert!(vetoes.contains(&Veto::unsatisfied_limit("rack")));

    // A different rack is free.
    assert!(harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "host3", &candidate, "t2")
        .is_empty());
}

#[test]
fn limit_constraint_on_attributeless_host_is_mismatch() {
    let harness = Harness::new();
    harness.save_host_attributes("bare_host", [("os", "linux")]);

    let mut task = task_config("jim", "myJob", 0);
    task.constraints.insert(Constraint::rack_limit(1));
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "bare_host", &task, "t1");
    assert!(vetoes.contains(&Veto::constraint_mismatch("rack")));
}

#[test]
fn dedicated_host_rejects_other_roles() {
    let harness = Harness::new();
    harness.save_host_attributes("db_host", [("dedicated", "dba/database")]);

    // A task without the dedicated constraint may not land here.
    let task = task_config("jim", "myJob", 0);
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "db_host", &task, "t1");
    assert!(vetoes.contains(&Veto::constraint_mismatch("dedicated")));

    // The owning role's dedicated task is accepted.
    let mut dba_task = task_config("dba", "database", 0);
    dba_task.constraints.insert(Constraint::dedicated("dba/database"));
    assert!(harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "db_host", &dba_task, "t2")
        .is_empty());
}

#[test]
fn dedicated_host_rejects_foreign_role_with_matching_value() {
    // Even a task carrying the host's exact dedicated value is refused when
    // its owner role does not match the value's role prefix; the filter does
    // not trust admission to have vetted the constraint.
    let harness = Harness::new();
    harness.save_host_attributes("db_host", [("dedicated", "dba/database")]);

    let mut impostor = task_config("jim", "myJob", 0);
    impostor.constraints.insert(Constraint::dedicated("dba/database"));
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "db_host", &impostor, "t1");
    assert!(vetoes.contains(&Veto::constraint_mismatch("dedicated")));
}

#[test]
fn dedicated_task_cannot_use_shared_hosts() {
    let harness = Harness::new();
    harness.save_host_attributes("shared_host", [("rack", "r1")]);

    let mut dba_task = task_config("dba", "database", 0);
    dba_task.constraints.insert(Constraint::dedicated("dba/database"));
    let vetoes = harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "shared_host", &dba_task, "t1");
    assert!(vetoes.contains(&Veto::constraint_mismatch("dedicated")));
}

#[test]
fn filter_is_idempotent() {
    let harness = Harness::new();
    harness.save_host_attributes("host_a", [("rack", "r1")]);
    let mut task = task_config("jim", "myJob", 0);
    task.constraints
        .insert(Constraint::value("rack", ["r9".to_string()]));

    let first = harness
        .filter
        .filter(&slot(0.5, 2048, 2048, 0), "host_a", &task, "t1");
    let second = harness
        .filter
        .filter(&slot(0.5, 2048, 2048, 0), "host_a", &task, "t1");
    assert_eq!(first, second);
}

#[test]
fn vetoed_event_fires_only_on_rejection() {
    let harness = Harness::new();
    let vetoed = Arc::new(AtomicUsize::new(0));
    let vetoed_probe = vetoed.clone();
    harness.bus.subscribe(move |event| {
        if matches!(event, SchedulerEvent::Vetoed { .. }) {
            vetoed_probe.fetch_add(1, Ordering::SeqCst);
        }
    });

    let task = task_config("jim", "myJob", 0);
    harness
        .filter
        .filter(&slot(2.0, 2048, 2048, 0), "host_a", &task, "t1");
    assert_eq!(vetoed.load(Ordering::SeqCst), 0);

    harness
        .filter
        .filter(&slot(0.1, 2048, 2048, 0), "host_a", &task, "t1");
    assert_eq!(vetoed.load(Ordering::SeqCst), 1);
}
