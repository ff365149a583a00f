//! Pipeline error types.

use thiserror::Error;

/// Seek failures. Recovered locally: the pipeline restores its previous
/// position and keeps streaming, surfacing the message through the next
/// presentation view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeekError {
    /// The target lies past the end of the stream.
    #[error("seek target is past the end of the stream")]
    PastEnd,

    /// The demuxer rejected the seek.
    #[error("seek rejected: {0}")]
    Rejected(String),
}

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Core container error.
    #[error("core error: {0}")]
    Core(#[from] lockstep_core::Error),

    /// Seek error that escaped local recovery.
    #[error("seek error: {0}")]
    Seek(#[from] SeekError),

    /// Decoder failure; cancels the whole pipeline.
    #[error("decode error: {0}")]
    Decode(String),

    /// I/O failure from a collaborator; cancels the whole pipeline.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires a running pipeline.
    #[error("pipeline is not running")]
    NotRunning,

    /// The pipeline was already started.
    #[error("pipeline already running")]
    AlreadyRunning,

    /// The pipeline was cancelled while the operation was in flight.
    #[error("pipeline aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Check if streaming can continue after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Seek(_))
    }
}

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_error_is_recoverable() {
        assert!(PipelineError::Seek(SeekError::PastEnd).is_recoverable());
        assert!(!PipelineError::Decode("bad packet".into()).is_recoverable());
    }

    #[test]
    fn test_core_error_conversion() {
        let err: PipelineError = lockstep_core::Error::Empty.into();
        assert!(matches!(err, PipelineError::Core(_)));
    }
}
