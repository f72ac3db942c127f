//! The contract between the pipeline and the external tools that do the
//! actual downloading, audio extraction and transcription.
//!
//! Adapters never touch the job store. They report progress through a
//! [`ProgressSink`] and finish with a [`StageResult`] or a [`StageError`];
//! the pipeline turns both into state transitions.

pub mod error;
pub mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::worker::job::{Acceleration, Job};

pub use error::{codes, StageError};
pub use progress::{ProgressSink, StageProgress};

/// Per-invocation settings derived from the job's options.
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub output_directory: PathBuf,
    /// Artifact produced by the previous stage, if any.
    pub input: Option<PathBuf>,
    /// Extraction only: also produce a WAV file for transcription.
    pub generate_wav: bool,
    pub language: String,
    pub bitrate: String,
    pub acceleration: Acceleration,
    /// Tripped when the job is cancelled. Adapters use it to stop their own process.
    pub cancel: CancellationToken,
}

impl StageOptions {
    pub fn for_job(job: &Job, cancel: CancellationToken) -> Self {
        Self {
            output_directory: job.output_directory.clone(),
            input: None,
            generate_wav: false,
            language: job.options.language.clone(),
            bitrate: job.options.bitrate.clone(),
            acceleration: job.options.acceleration,
            cancel,
        }
    }

    pub fn with_input(mut self, input: Option<PathBuf>) -> Self {
        self.input = input;
        self
    }

    pub fn with_wav(mut self, generate_wav: bool) -> Self {
        self.generate_wav = generate_wav;
        self
    }
}

/// Opaque payload returned by a successful stage.
///
/// Usually a bare path string, or an object such as `{mp3Path, wavPath}`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub value: Value,
}

impl StageResult {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn path(path: impl AsRef<Path>) -> Self {
        Self::new(Value::String(path.as_ref().to_string_lossy().into_owned()))
    }

    /// Result of audio extraction. `wavPath` is omitted when no WAV was made.
    pub fn audio(mp3: impl AsRef<Path>, wav: Option<&Path>) -> Self {
        let mut value = json!({ "mp3Path": mp3.as_ref().to_string_lossy() });
        if let Some(wav) = wav {
            value["wavPath"] = Value::String(wav.to_string_lossy().into_owned());
        }
        Self::new(value)
    }

    /// The payload as a path when it is a non-empty string.
    pub fn as_path(&self) -> Option<PathBuf> {
        match &self.value {
            Value::String(s) if !s.is_empty() => Some(PathBuf::from(s)),
            _ => None,
        }
    }

    /// A non-empty string field of an object payload, as a path.
    pub fn path_field(&self, key: &str) -> Option<PathBuf> {
        match self.value.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(PathBuf::from(s)),
            _ => None,
        }
    }

    /// The main artifact: a bare path, or the object's `path` field.
    pub fn primary_path(&self) -> Option<PathBuf> {
        self.as_path().or_else(|| self.path_field("path"))
    }
}

/// One external processing stage.
#[async_trait]
pub trait StageAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the stage to completion.
    ///
    /// The pipeline does not abort this future on cancellation; adapters
    /// watch `options.cancel` and stop their own work.
    async fn execute(
        &self,
        job: &Job,
        options: &StageOptions,
        progress: ProgressSink,
    ) -> Result<StageResult, StageError>;
}

/// The three adapters a pipeline sequences.
#[derive(Clone)]
pub struct StageSet {
    pub download: Arc<dyn StageAdapter>,
    pub extract: Arc<dyn StageAdapter>,
    pub transcribe: Arc<dyn StageAdapter>,
}

impl StageSet {
    pub fn new(
        download: Arc<dyn StageAdapter>,
        extract: Arc<dyn StageAdapter>,
        transcribe: Arc<dyn StageAdapter>,
    ) -> Self {
        Self {
            download,
            extract,
            transcribe,
        }
    }
}
