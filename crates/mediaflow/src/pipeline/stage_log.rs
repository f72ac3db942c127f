//! Append-only record of stage starts and finishes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::worker::status::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageLogKind {
    Started,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageLogEntry {
    pub job_id: String,
    pub stage: JobStatus,
    pub kind: StageLogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StageLogEntry {
    pub fn new(job_id: &str, stage: JobStatus, kind: StageLogKind, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

pub trait StageLog: Send + Sync {
    fn append(&self, entry: StageLogEntry);
}

/// Emits entries as tracing events.
pub struct TracingStageLog;

impl StageLog for TracingStageLog {
    fn append(&self, entry: StageLogEntry) {
        match entry.kind {
            StageLogKind::Failed => warn!(
                job_id = %entry.job_id,
                stage = %entry.stage,
                "Stage failed: {}",
                entry.message
            ),
            kind => info!(
                job_id = %entry.job_id,
                stage = %entry.stage,
                kind = ?kind,
                "{}",
                entry.message
            ),
        }
    }
}
