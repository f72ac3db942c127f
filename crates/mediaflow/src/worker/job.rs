use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::JobError;
use crate::worker::status::JobStatus;

/// What happens after the download stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostAction {
    #[default]
    None,
    Extract,
    Transcribe,
}

/// Hardware preference handed to the transcription stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acceleration {
    #[default]
    Auto,
    Gpu,
    Cpu,
}

fn default_language() -> String {
    "auto".to_string()
}

fn default_bitrate() -> String {
    "192k".to_string()
}

fn default_keep_video() -> bool {
    true
}

/// Per-job processing options. Read-only once the job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    /// Keep the downloaded video once transcription has produced its output.
    #[serde(default = "default_keep_video")]
    pub keep_video: bool,
    #[serde(default)]
    pub acceleration: Acceleration,
    #[serde(default)]
    pub post_action: PostAction,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            language: default_language(),
            bitrate: default_bitrate(),
            keep_video: default_keep_video(),
            acceleration: Acceleration::default(),
            post_action: PostAction::default(),
        }
    }
}

/// Progress within the current stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Percentage in `[0, 100]`.
    pub current: f64,
    pub total: f64,
    pub message: String,
}

impl Progress {
    pub fn reset(message: impl Into<String>) -> Self {
        Self {
            current: 0.0,
            total: 100.0,
            message: message.into(),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::reset("")
    }
}

/// Error recorded on a FAILED job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl JobErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Artifacts produced so far, keyed by output name (`video`, `audio`, `transcript`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutputs {
    pub outputs: BTreeMap<String, Value>,
}

/// A request to create a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    pub output_directory: PathBuf,
    #[serde(default)]
    pub options: Option<JobOptions>,
}

impl JobSpec {
    pub fn new(url: impl Into<String>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            url: url.into(),
            output_directory: output_directory.into(),
            options: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Fills in options from configured defaults when the request carries none.
    pub fn with_defaults(mut self, defaults: &JobOptions) -> Self {
        if self.options.is_none() {
            self.options = Some(defaults.clone());
        }
        self
    }

    /// Checks the fields every job needs before it may enter the store.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.url.trim().is_empty() {
            return Err(JobError::validation("url is required"));
        }
        if self.output_directory.as_os_str().is_empty() {
            return Err(JobError::validation("outputDirectory is required"));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(JobError::validation("id must not be blank"));
            }
        }
        Ok(())
    }
}

/// One pipeline run. Mutated only through the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub source_url: String,
    pub output_directory: PathBuf,
    pub options: JobOptions,
    pub status: JobStatus,
    pub progress: Progress,
    pub error: Option<JobErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stage_start_time: Option<DateTime<Utc>>,
    pub result: JobOutputs,
}

impl Job {
    /// Builds a PENDING job from an already validated spec.
    pub(crate) fn from_spec(spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            id: spec
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            source_url: spec.url,
            output_directory: spec.output_directory,
            options: spec.options.unwrap_or_default(),
            status: JobStatus::Pending,
            progress: Progress::reset("Queued"),
            error: None,
            created_at: now,
            updated_at: now,
            stage_start_time: None,
            result: JobOutputs::default(),
        }
    }

    /// Looks up an output recorded under `key`.
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.result.outputs.get(key)
    }
}
