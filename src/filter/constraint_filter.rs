//! Evaluates a single task constraint against a host.

use crate::filter::Veto;
use crate::model::attributes::HostAttributes;
use crate::model::constraints::{Constraint, TaskConstraint};
use crate::model::task::ScheduledTask;

/// Returns the veto produced by `constraint` on `host_attributes`, if any.
///
/// VALUE constraints match when any constraint value appears among the
/// host's values for the attribute, inverted when negated. LIMIT constraints
/// cap how many active tasks of the same job may share this host's value of
/// the attribute; a host lacking the attribute entirely is a mismatch.
pub fn evaluate(
    constraint: &Constraint,
    host_attributes: &HostAttributes,
    active_tasks: &[ScheduledTask],
    load_attributes: &dyn Fn(&str) -> Option<HostAttributes>,
) -> Option<Veto> {
    let host_values = host_attributes.values_of(&constraint.name);

    match &constraint.constraint {
        TaskConstraint::Value { negated, values } => {
            let matches = values.iter().any(|v| host_values.contains(v)) ^ *negated;
            if matches {
                None
            } else {
                Some(Veto::constraint_mismatch(&constraint.name))
            }
        }
        TaskConstraint::Limit { limit } => {
            if host_values.is_empty() {
                return Some(Veto::constraint_mismatch(&constraint.name));
            }

            let count = active_tasks
                .iter()
                .filter_map(|task| task.assigned_task.slave_host.as_deref())
                .filter_map(load_attributes)
                .filter(|attrs| {
                    attrs
                        .values_of(&constraint.name)
                        .intersection(&host_values)
                        .next()
                        .is_some()
                })
                .count();

            if count >= *limit as usize {
                Some(Veto::unsatisfied_limit(&constraint.name))
            } else {
                None
            }
        }
    }
}
