//! Builders for job specs and scripted stage adapters.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use mediaflow::worker::Acceleration;
use mediaflow::{
    Job, JobOptions, JobSpec, PostAction, ProgressSink, StageAdapter, StageError, StageOptions,
    StageResult, StageSet,
};

/// Builder for `JobSpec` instances.
pub struct JobSpecBuilder {
    id: Option<String>,
    url: String,
    output_directory: PathBuf,
    options: JobOptions,
}

impl JobSpecBuilder {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            url: "https://example.com/watch?v=test".to_string(),
            output_directory: output_directory.into(),
            options: JobOptions::default(),
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn post_action(mut self, post_action: PostAction) -> Self {
        self.options.post_action = post_action;
        self
    }

    pub fn keep_video(mut self, keep_video: bool) -> Self {
        self.options.keep_video = keep_video;
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.options.language = language.to_string();
        self
    }

    pub fn acceleration(mut self, acceleration: Acceleration) -> Self {
        self.options.acceleration = acceleration;
        self
    }

    pub fn build(self) -> JobSpec {
        let spec = JobSpec::new(self.url, self.output_directory).with_options(self.options);
        match self.id {
            Some(id) => spec.with_id(id),
            None => spec,
        }
    }
}

/// One recorded adapter invocation.
#[derive(Debug, Clone)]
pub struct StageCall {
    pub job_id: String,
    pub input: Option<PathBuf>,
    pub generate_wav: bool,
    pub language: String,
}

#[derive(Clone)]
enum Script {
    Value(Value),
    /// Writes a file into the output directory and returns its path.
    File(&'static str),
    /// Writes `audio.mp3`, plus `audio.wav` when requested and allowed.
    Audio { wav: bool },
    Fail(StageError),
    Panic(&'static str),
    /// Blocks until the cancel token trips, then fails like a killed process.
    WaitForCancel,
}

/// A stage adapter driven by a fixed script.
pub struct FakeStage {
    name: &'static str,
    script: Script,
    progress: Vec<f64>,
    failures_left: AtomicUsize,
    failure: Option<StageError>,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
    calls: Mutex<Vec<StageCall>>,
}

impl FakeStage {
    fn with_script(name: &'static str, script: Script) -> Self {
        Self {
            name,
            script,
            progress: Vec::new(),
            failures_left: AtomicUsize::new(0),
            failure: None,
            gate: None,
            started: Arc::new(Notify::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn returning(name: &'static str, value: Value) -> Self {
        Self::with_script(name, Script::Value(value))
    }

    pub fn writing_file(name: &'static str, file_name: &'static str) -> Self {
        Self::with_script(name, Script::File(file_name))
    }

    pub fn audio(name: &'static str) -> Self {
        Self::with_script(name, Script::Audio { wav: true })
    }

    pub fn audio_mp3_only(name: &'static str) -> Self {
        Self::with_script(name, Script::Audio { wav: false })
    }

    pub fn failing(name: &'static str, error: StageError) -> Self {
        Self::with_script(name, Script::Fail(error))
    }

    pub fn panicking(name: &'static str, message: &'static str) -> Self {
        Self::with_script(name, Script::Panic(message))
    }

    pub fn waiting_for_cancel(name: &'static str) -> Self {
        Self::with_script(name, Script::WaitForCancel)
    }

    /// Progress percentages reported before finishing.
    pub fn with_progress(mut self, percents: &[f64]) -> Self {
        self.progress = percents.to_vec();
        self
    }

    /// Fails the first `times` invocations with `error`, then follows the script.
    pub fn fail_first(mut self, times: usize, error: StageError) -> Self {
        self.failures_left = AtomicUsize::new(times);
        self.failure = Some(error);
        self
    }

    /// Holds each invocation until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Notified whenever an invocation starts.
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }

    pub fn calls(&self) -> Vec<StageCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn take_failure(&self) -> Option<StageError> {
        let remaining = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => self.failure.clone(),
            Err(_) => None,
        }
    }
}

async fn write_artifact(dir: &Path, file_name: &str) -> Result<PathBuf, StageError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, file_name.as_bytes()).await?;
    Ok(path)
}

#[async_trait]
impl StageAdapter for FakeStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(
        &self,
        job: &Job,
        options: &StageOptions,
        progress: ProgressSink,
    ) -> Result<StageResult, StageError> {
        self.calls.lock().unwrap().push(StageCall {
            job_id: job.id.clone(),
            input: options.input.clone(),
            generate_wav: options.generate_wav,
            language: options.language.clone(),
        });
        self.started.notify_one();

        for percent in &self.progress {
            progress.update(*percent, format!("{} {}%", self.name, percent));
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        match &self.script {
            Script::Value(value) => Ok(StageResult::new(value.clone())),
            Script::File(file_name) => {
                let path = write_artifact(&options.output_directory, file_name).await?;
                Ok(StageResult::path(path))
            }
            Script::Audio { wav } => {
                let mp3 = write_artifact(&options.output_directory, "audio.mp3").await?;
                let wav = if *wav && options.generate_wav {
                    Some(write_artifact(&options.output_directory, "audio.wav").await?)
                } else {
                    None
                };
                Ok(StageResult::audio(mp3, wav.as_deref()))
            }
            Script::Fail(error) => Err(error.clone()),
            Script::Panic(message) => panic!("{}", message),
            Script::WaitForCancel => {
                options.cancel.cancelled().await;
                Err(StageError::new("PROCESS_KILLED", "process terminated"))
            }
        }
    }
}

/// Adapters used by a test, kept so their calls can be inspected.
pub struct FakeStages {
    pub download: Arc<FakeStage>,
    pub extract: Arc<FakeStage>,
    pub transcribe: Arc<FakeStage>,
}

impl FakeStages {
    /// Download writes `video.mp4`, extraction writes audio, transcription writes `transcript.txt`.
    pub fn working() -> Self {
        Self::new(
            FakeStage::writing_file("download", "video.mp4"),
            FakeStage::audio("extract"),
            FakeStage::writing_file("transcribe", "transcript.txt"),
        )
    }

    pub fn new(download: FakeStage, extract: FakeStage, transcribe: FakeStage) -> Self {
        Self {
            download: Arc::new(download),
            extract: Arc::new(extract),
            transcribe: Arc::new(transcribe),
        }
    }

    pub fn with_download(mut self, download: FakeStage) -> Self {
        self.download = Arc::new(download);
        self
    }

    pub fn with_extract(mut self, extract: FakeStage) -> Self {
        self.extract = Arc::new(extract);
        self
    }

    pub fn with_transcribe(mut self, transcribe: FakeStage) -> Self {
        self.transcribe = Arc::new(transcribe);
        self
    }

    pub fn set(&self) -> StageSet {
        StageSet::new(
            self.download.clone(),
            self.extract.clone(),
            self.transcribe.clone(),
        )
    }
}
