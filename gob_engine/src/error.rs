use gob_formats::ReadError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{what} is full ({capacity} entries)")]
    CapacityExceeded { what: &'static str, capacity: usize },
    #[error("malformed program at offset {offset:#06x}: {reason}")]
    MalformedProgram { offset: usize, reason: String },
    #[error("unknown opcode {opcode:#04x} at offset {offset:#06x}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Resource(#[from] anyhow::Error),
}

impl EngineError {
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        EngineError::MalformedProgram {
            offset,
            reason: reason.into(),
        }
    }

    /// Capacity faults are reported and skipped instead of ending the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::CapacityExceeded { .. })
    }
}
