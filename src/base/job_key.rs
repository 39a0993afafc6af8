use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Returns true for identifiers matching `[A-Za-z_][A-Za-z0-9._-]{0,254}`.
pub fn is_good_identifier(identifier: &str) -> bool {
    if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LENGTH {
        return false;
    }
    let mut chars = identifier.chars();
    let first = chars.next().expect("non-empty checked above");
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Uniquely identifies a job: (role, environment, name).
///
/// At most one active task may exist per (JobKey, shard id) at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub role: String,
    pub environment: String,
    pub name: String,
}

impl JobKey {
    pub fn new(
        role: impl Into<String>,
        environment: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            environment: environment.into(),
            name: name.into(),
        }
    }

    /// Checks that every component is a well-formed identifier.
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("role", &self.role),
            ("environment", &self.environment),
            ("name", &self.name),
        ] {
            if !is_good_identifier(value) {
                return Err(SchedulerError::Validation(format!(
                    "Job {label} contains illegal characters: {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Canonical `role/environment/name` path form.
    pub fn to_path(&self) -> String {
        format!("{}/{}/{}", self.role, self.environment, self.name)
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_path())
    }
}
