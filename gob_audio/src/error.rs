use thiserror::Error;

pub type Result<T> = std::result::Result<T, AudioError>;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unsupported {what} version {version}")]
    UnsupportedVersion { what: &'static str, version: u8 },
    #[error("{what} is truncated at offset {offset}")]
    Truncated { what: &'static str, offset: usize },
    #[error("instrument {index} out of range ({count} loaded)")]
    InstrumentOutOfRange { index: usize, count: usize },
    #[error("malformed MIDI data at offset {offset}: {reason}")]
    Midi { offset: usize, reason: String },
    #[error("stream renders at {stream} Hz but the mixer runs at {output} Hz")]
    RateMismatch { stream: u32, output: u32 },
    #[error("sound {0} is not registered")]
    UnknownSound(u16),
    #[error(transparent)]
    Format(#[from] anyhow::Error),
}
