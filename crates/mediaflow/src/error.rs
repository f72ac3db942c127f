use std::path::PathBuf;
use thiserror::Error;

use crate::worker::status::JobStatus;

#[derive(Error, Debug)]
pub enum MediaflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Errors raised by the job store's state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Invalid job specification: {message}")]
    Validation { message: String },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id} cannot be removed while {status}")]
    NotTerminal { job_id: String, status: JobStatus },
}

impl JobError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        JobError::Validation {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker pool is shut down")]
    ShutDown,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    #[error("Job {job_id} cannot be retried while {status}")]
    NotRetryable { job_id: String, status: JobStatus },

    #[error(transparent)]
    Job(#[from] JobError),
}

pub type Result<T> = std::result::Result<T, MediaflowError>;
