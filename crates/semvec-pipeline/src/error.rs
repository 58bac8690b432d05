//! Pipeline error types.

use thiserror::Error;

/// Errors that can occur interacting with the write pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The writer has shut down and no longer accepts tasks
    #[error("Write queue closed")]
    QueueClosed,

    /// The writer went away before resolving this task's outcome
    #[error("Outcome channel closed")]
    OutcomeChannelClosed,

    /// Invalid retry policy configuration
    #[error("Invalid retry policy: {0}")]
    InvalidPolicy(String),
}
