use std::path::PathBuf;

use thiserror::Error;

use crate::error::JobError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The state machine rejected a transition the pipeline attempted and
    /// cancellation does not explain it.
    #[error("State machine rejected pipeline transition: {0}")]
    Store(#[from] JobError),
}

/// Non-fatal problems collected during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineWarning {
    MetadataWriteFailed { stage: String, error: String },
    SourceCleanupFailed { path: PathBuf, error: String },
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineWarning::MetadataWriteFailed { stage, error } => {
                write!(f, "metadata snapshot for {} not written: {}", stage, error)
            }
            PipelineWarning::SourceCleanupFailed { path, error } => {
                write!(f, "could not delete {}: {}", path.display(), error)
            }
        }
    }
}
