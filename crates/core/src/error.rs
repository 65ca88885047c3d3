//! Engine error taxonomy
//!
//! Allocation and configuration errors abort construction. Submission and wait
//! failures only cost the current step: the caller logs them and keeps looping.

use crate::stage::Stage;

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by execution contexts and the fire engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Requested grid cannot be simulated
    #[error("invalid grid {width}x{height}: {reason}")]
    InvalidDimensions {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// What is wrong with it
        reason: &'static str,
    },

    /// A host or device buffer could not be allocated
    #[error("failed to allocate {what} ({bytes} bytes)")]
    AllocationFailure {
        /// Buffer name
        what: &'static str,
        /// Requested size
        bytes: u64,
    },

    /// A stage could not be enqueued on the execution context
    #[error("failed to submit {stage}: {reason}")]
    SubmissionFailure {
        /// Stage that was being enqueued
        stage: Stage,
        /// Backend error message
        reason: String,
    },

    /// A completion signal resolved with an error
    #[error("failed to wait for completion: {0}")]
    WaitFailure(String),

    /// No usable execution context
    #[error("execution context unavailable: {0}")]
    ContextUnavailable(String),

    /// The engine was driven with a context that does not own its buffers
    #[error("engine buffers belong to a different execution context")]
    ContextMismatch,

    /// Host data does not match the buffer it is written to
    #[error("size mismatch: expected {expected} values, got {actual}")]
    SizeMismatch {
        /// Number of values the buffer holds
        expected: usize,
        /// Number of values supplied
        actual: usize,
    },
}

impl EngineError {
    /// True for errors that leave no usable engine behind
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimensions { .. } | Self::AllocationFailure { .. }
        )
    }

    pub(crate) fn submission(stage: Stage, reason: impl Into<String>) -> Self {
        Self::SubmissionFailure {
            stage,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::AllocationFailure {
            what: "intensity",
            bytes: 16
        }
        .is_fatal());
        assert!(!EngineError::submission(Stage::Propagation, "queue closed").is_fatal());
        assert!(!EngineError::WaitFailure("lost".into()).is_fatal());
        assert!(!EngineError::ContextMismatch.is_fatal());
    }

    #[test]
    fn test_display_names_stage() {
        let err = EngineError::submission(Stage::Downsample, "device lost");
        assert_eq!(err.to_string(), "failed to submit downsample: device lost");
    }
}
