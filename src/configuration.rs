//! Admission: validates job configurations and populates defaults.

use crate::base::job_key::is_good_identifier;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::model::constraints::{
    Constraint, TaskConstraint, DEDICATED_ATTRIBUTE, HOST_CONSTRAINT, RACK_CONSTRAINT,
};
use crate::model::job::JobConfiguration;
use crate::model::task::TaskConfig;

fn has_constraint(task: &TaskConfig, name: &str) -> bool {
    task.constraints.iter().any(|c| c.name == name)
}

fn dedicated_constraint(task: &TaskConfig) -> Option<&Constraint> {
    task.constraints.iter().find(|c| c.name == DEDICATED_ATTRIBUTE)
}

pub fn is_dedicated(task: &TaskConfig) -> bool {
    dedicated_constraint(task).is_some()
}

/// Minimal shape check: one `@` with non-empty local part and domain.
fn is_valid_email(email: &str) -> bool {
    let mut parts = email.split('@');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && domain.contains('.')
    )
}

/// Applies non-validating defaults to a task: the built-in host limit, the
/// rack limit for production services on shared hosts, and default task
/// links for well-known ports. Also run by the storage backfill.
pub fn apply_task_defaults(task: &mut TaskConfig) {
    if !has_constraint(task, HOST_CONSTRAINT) {
        task.constraints.insert(Constraint::host_limit(1));
    }
    if !is_dedicated(task)
        && task.production
        && task.is_service
        && !has_constraint(task, RACK_CONSTRAINT)
    {
        task.constraints.insert(Constraint::rack_limit(1));
    }
    if task.task_links.is_empty() {
        if task.requested_ports.contains("health") {
            task.task_links.insert(
                "health".to_string(),
                "http://%host%:%port:health%".to_string(),
            );
        }
        if task.requested_ports.contains("http") {
            task.task_links
                .insert("http".to_string(), "http://%host%:%port:http%".to_string());
        }
    }
}

/// Checks validity of a job configuration and returns a populated copy:
/// owner, job name and environment are pushed down into the task template
/// and defaults are applied. Cron expressions are not parsed here; the cron
/// job manager validates them against its scheduler when the job registers.
pub fn validate_and_populate(
    job: &JobConfiguration,
    config: &SchedulerConfig,
) -> Result<JobConfiguration> {
    if job.shard_count == 0 {
        return Err(SchedulerError::Validation(
            "Shard count must be positive".to_string(),
        ));
    }
    if job.shard_count as usize > config.max_tasks_per_job {
        return Err(SchedulerError::Validation(format!(
            "Job exceeds task limit of {}",
            config.max_tasks_per_job
        )));
    }

    job.key.validate()?;
    for (label, value) in [("role", &job.owner.role), ("user", &job.owner.user)] {
        if !is_good_identifier(value) {
            return Err(SchedulerError::Validation(format!(
                "Job {label} contains illegal characters: {value}"
            )));
        }
    }
    if job.owner.role != job.key.role {
        return Err(SchedulerError::Validation(format!(
            "Role in job key ({}) does not match job owner ({})",
            job.key.role, job.owner.role
        )));
    }

    let mut populated = job.clone();
    let task = &mut populated.task_config;
    task.owner = job.owner.clone();
    task.job_name = job.key.name.clone();
    if task.environment.is_empty() {
        task.environment = job.key.environment.clone();
    }

    if job.is_cron() && task.is_service {
        return Err(SchedulerError::Validation(
            "A service task may not be run on a cron schedule".to_string(),
        ));
    }

    if task.num_cpus <= 0.0 {
        return Err(SchedulerError::Validation(
            "num_cpus must be greater than 0".to_string(),
        ));
    }
    if task.ram_mb == 0 {
        return Err(SchedulerError::Validation(
            "ram_mb must be greater than 0".to_string(),
        ));
    }
    if task.disk_mb == 0 {
        return Err(SchedulerError::Validation(
            "disk_mb must be greater than 0".to_string(),
        ));
    }
    if task.priority < 0 {
        return Err(SchedulerError::Validation(
            "Priority may not be negative".to_string(),
        ));
    }
    if task.max_task_failures == 0 {
        return Err(SchedulerError::Validation(
            "max_task_failures must be at least 1".to_string(),
        ));
    }

    if config.require_contact_email
        && !task
            .contact_email
            .as_deref()
            .is_some_and(is_valid_email)
    {
        return Err(SchedulerError::Validation(
            "A valid contact email address is required".to_string(),
        ));
    }

    if let Some(constraint) = dedicated_constraint(task) {
        let values = match &constraint.constraint {
            TaskConstraint::Value { negated: false, values } => values,
            _ => {
                return Err(SchedulerError::Validation(
                    "A dedicated constraint must be of value type".to_string(),
                ))
            }
        };
        if values.len() != 1 {
            return Err(SchedulerError::Validation(
                "A dedicated constraint must have exactly one value".to_string(),
            ));
        }
        let value = values.iter().next().expect("single value checked above");
        let dedicated_role = value.split('/').next().unwrap_or("");
        if dedicated_role != job.owner.role {
            return Err(SchedulerError::Validation(format!(
                "Only {dedicated_role} may use hosts dedicated for that role"
            )));
        }
    }

    apply_task_defaults(task);
    Ok(populated)
}
