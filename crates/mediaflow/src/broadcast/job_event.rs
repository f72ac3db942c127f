//! Job lifecycle events emitted by the job store.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::worker::job::Job;
use crate::worker::status::JobStatus;

/// Discriminant of a [`JobEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    Created,
    StageChanged,
    ProgressUpdated,
    Removed,
}

impl JobEventKind {
    /// Name used when forwarding the event to external observers.
    pub fn as_str(self) -> &'static str {
        match self {
            JobEventKind::Created => "job:created",
            JobEventKind::StageChanged => "job:stage-changed",
            JobEventKind::ProgressUpdated => "job:progress-updated",
            JobEventKind::Removed => "job:removed",
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-specific data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum JobEventPayload {
    #[serde(rename = "job:created")]
    Created { job: Box<Job> },
    #[serde(rename = "job:stage-changed", rename_all = "camelCase")]
    StageChanged {
        old_status: JobStatus,
        new_status: JobStatus,
    },
    #[serde(rename = "job:progress-updated")]
    ProgressUpdated { percent: f64, message: String },
    #[serde(rename = "job:removed")]
    Removed,
}

/// An immutable notification about one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    #[serde(flatten)]
    pub payload: JobEventPayload,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    fn new(job_id: &str, payload: JobEventPayload) -> Self {
        Self {
            job_id: job_id.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn created(job: &Job) -> Self {
        Self::new(
            &job.id,
            JobEventPayload::Created {
                job: Box::new(job.clone()),
            },
        )
    }

    pub fn stage_changed(job_id: &str, old_status: JobStatus, new_status: JobStatus) -> Self {
        Self::new(
            job_id,
            JobEventPayload::StageChanged {
                old_status,
                new_status,
            },
        )
    }

    pub fn progress_updated(job_id: &str, percent: f64, message: &str) -> Self {
        Self::new(
            job_id,
            JobEventPayload::ProgressUpdated {
                percent,
                message: message.to_string(),
            },
        )
    }

    pub fn removed(job_id: &str) -> Self {
        Self::new(job_id, JobEventPayload::Removed)
    }

    pub fn kind(&self) -> JobEventKind {
        match self.payload {
            JobEventPayload::Created { .. } => JobEventKind::Created,
            JobEventPayload::StageChanged { .. } => JobEventKind::StageChanged,
            JobEventPayload::ProgressUpdated { .. } => JobEventKind::ProgressUpdated,
            JobEventPayload::Removed => JobEventKind::Removed,
        }
    }

    /// The `(old, new)` pair of a stage change.
    pub fn transition(&self) -> Option<(JobStatus, JobStatus)> {
        match self.payload {
            JobEventPayload::StageChanged {
                old_status,
                new_status,
            } => Some((old_status, new_status)),
            _ => None,
        }
    }
}
