//! Per-job metadata snapshot written into the job's output directory.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::StorageError;
use crate::worker::job::{Job, JobErrorInfo, JobOptions};
use crate::worker::status::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRecordStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub start_time: DateTime<Utc>,
    pub status: StageRecordStatus,
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    /// Name of the current stage, or of the terminal state once reached.
    pub stage: String,
    pub options: JobOptions,
    pub stages: BTreeMap<String, StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorInfo>,
}

impl JobMetadata {
    pub fn for_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            url: job.source_url.clone(),
            created_at: job.created_at,
            stage: job.status.as_str().to_string(),
            options: job.options.clone(),
            stages: BTreeMap::new(),
            error: None,
        }
    }

    pub fn start_stage(&mut self, stage: JobStatus) {
        self.stage = stage.as_str().to_string();
        self.stages.insert(
            stage.as_str().to_string(),
            StageRecord {
                start_time: Utc::now(),
                status: StageRecordStatus::Running,
                result: None,
                end_time: None,
            },
        );
    }

    pub fn complete_stage(&mut self, stage: JobStatus, result: Option<Value>) {
        self.finish_stage(stage, StageRecordStatus::Completed, result);
    }

    /// Marks the running stage failed and records the error.
    pub fn fail_stage(&mut self, stage: JobStatus, error: &JobErrorInfo) {
        self.finish_stage(stage, StageRecordStatus::Failed, None);
        self.stage = JobStatus::Failed.as_str().to_string();
        self.error = Some(error.clone());
    }

    pub fn cancel_stage(&mut self, stage: JobStatus) {
        self.finish_stage(stage, StageRecordStatus::Cancelled, None);
        self.stage = JobStatus::Cancelled.as_str().to_string();
    }

    pub fn mark_completed(&mut self) {
        self.stage = JobStatus::Completed.as_str().to_string();
    }

    fn finish_stage(&mut self, stage: JobStatus, status: StageRecordStatus, result: Option<Value>) {
        let now = Utc::now();
        let record = self
            .stages
            .entry(stage.as_str().to_string())
            .or_insert_with(|| StageRecord {
                start_time: now,
                status: StageRecordStatus::Running,
                result: None,
                end_time: None,
            });
        // A stage that already finished keeps its outcome.
        if record.status != StageRecordStatus::Running {
            return;
        }
        record.status = status;
        record.end_time = Some(now);
        if result.is_some() {
            record.result = result;
        }
    }
}

/// Writes `metadata` to `path` through a temp file and rename, creating
/// parent directories as needed.
pub async fn write_metadata(path: &Path, metadata: &JobMetadata) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(metadata)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, &json)
        .await
        .map_err(|e| StorageError::WriteFile {
            path: temp_path.clone(),
            source: e,
        })?;

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;

    debug!(stage = %metadata.stage, "Metadata snapshot written");
    Ok(())
}

pub async fn read_metadata(path: &Path) -> Result<JobMetadata, StorageError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(serde_json::from_slice(&bytes)?)
}
