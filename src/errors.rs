/*!
 * Error types for the tubeslides pipeline.
 *
 * `PipelineError` is the closed taxonomy callers branch on. Internal plumbing
 * carries `anyhow::Error` and wraps one of these variants where the kind matters,
 * so callers recover it with `downcast_ref`.
 */

use thiserror::Error;

/// Errors with a meaning the pipeline and its callers act upon
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Malformed submission, rejected before any stage runs
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A collaborator (downloader, encoder, store...) failed
    #[error("{tool} failed: {message}")]
    ExternalTool {
        /// Name of the failing collaborator
        tool: String,
        /// Failure detail as reported by the collaborator
        message: String,
    },

    /// A budget ran out, either the whole-run ceiling or a per-call limit
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// The budget that was exceeded
        seconds: u64,
    },

    /// Admission ceiling reached; the caller should retry later
    #[error("{active} jobs already running, at most {ceiling} allowed; retry later")]
    Overloaded {
        /// Jobs counted as active at submission time
        active: usize,
        /// Configured ceiling
        ceiling: usize,
    },

    /// Unknown job id
    #[error("Job {0} not found")]
    NotFound(i64),

    /// The run was stopped from outside
    #[error("{0}")]
    Cancelled(String),
}

impl PipelineError {
    /// Shorthand for a collaborator failure
    pub fn tool(tool: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for an exhausted budget
    pub fn timeout(operation: impl Into<String>, limit: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds: limit.as_secs(),
        }
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error raised by the pipeline or its admission gate
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<PipelineError>() {
            Ok(pipeline) => Self::Pipeline(pipeline),
            Err(other) => Self::Unknown(format!("{:#}", other)),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
