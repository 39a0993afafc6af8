use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A job or task configuration failed admission validation.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// A scheduling request could not be honored (caller may retry).
    #[error("Schedule error: {0}")]
    Schedule(String),

    /// A rolling-update operation was rejected.
    #[error("Update error: {0}")]
    Update(String),

    /// Storage was unavailable; periodic jobs log this and retry next tick.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The opaque executor payload could not be encoded or decoded.
    #[error("Coding error: {0}")]
    Coding(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
