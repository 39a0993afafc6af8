use crate::error::Result;
use crate::model::task::TaskConfig;

/// Encodes the opaque executor payload shipped with a task launch, and
/// decodes payloads coming back from the wire. The core never interprets the
/// bytes; failures surface as [`crate::error::SchedulerError::Coding`] and the
/// offer being matched is skipped for the cycle.
pub trait Codec: Send + Sync {
    fn encode(&self, task: &TaskConfig) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through codec: ships the stored executor payload verbatim.
#[derive(Debug, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn encode(&self, task: &TaskConfig) -> Result<Vec<u8>> {
        Ok(task.executor_config.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}
