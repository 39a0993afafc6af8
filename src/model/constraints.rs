use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Name of the attribute reserving hosts for a single role.
pub const DEDICATED_ATTRIBUTE: &str = "dedicated";

/// Built-in constraint limiting shards per host.
pub const HOST_CONSTRAINT: &str = "host";

/// Built-in constraint limiting shards per rack.
pub const RACK_CONSTRAINT: &str = "rack";

/// A placement constraint on a named host attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub constraint: TaskConstraint,
}

impl Constraint {
    /// Limit-1 `host` constraint: at most one shard of a job per host.
    pub fn host_limit(limit: u32) -> Self {
        Self {
            name: HOST_CONSTRAINT.to_string(),
            constraint: TaskConstraint::Limit { limit },
        }
    }

    /// Limit-N `rack` constraint for spreading across failure domains.
    pub fn rack_limit(limit: u32) -> Self {
        Self {
            name: RACK_CONSTRAINT.to_string(),
            constraint: TaskConstraint::Limit { limit },
        }
    }

    pub fn value(name: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            constraint: TaskConstraint::Value {
                negated: false,
                values: values.into_iter().collect(),
            },
        }
    }

    pub fn dedicated(value: impl Into<String>) -> Self {
        Constraint::value(DEDICATED_ATTRIBUTE, [value.into()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskConstraint {
    /// The host attribute must (or, negated, must not) carry one of `values`.
    Value {
        negated: bool,
        values: BTreeSet<String>,
    },
    /// At most `limit` active tasks of the job may share the attribute value.
    Limit { limit: u32 },
}
