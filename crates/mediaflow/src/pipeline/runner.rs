use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::broadcast::{JobStore, TransitionContext};
use crate::error::JobError;
use crate::sanitize;
use crate::stage::{
    codes, ProgressSink, StageAdapter, StageError, StageOptions, StageResult, StageSet,
};
use crate::worker::job::{JobErrorInfo, PostAction};
use crate::worker::status::JobStatus;

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::{PipelineError, PipelineWarning};
use super::metadata::write_metadata;
use super::progress::ProgressForwarder;
use super::stage_log::{StageLog, StageLogEntry, StageLogKind, TracingStageLog};

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed { outputs: BTreeMap<String, Value> },
    Failed { error: JobErrorInfo },
    Cancelled,
}

/// Why a run stopped before COMPLETED.
enum Halt {
    Cancelled,
    Failed(StageError),
    Store(JobError),
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: Arc<JobStore>,
    stages: StageSet,
    stage_log: Arc<dyn StageLog>,
}

impl Pipeline {
    pub fn new(config: Arc<PipelineConfig>, store: Arc<JobStore>, stages: StageSet) -> Self {
        Self {
            config,
            store,
            stages,
            stage_log: Arc::new(TracingStageLog),
        }
    }

    pub fn with_stage_log(mut self, stage_log: Arc<dyn StageLog>) -> Self {
        self.stage_log = stage_log;
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Runs a PENDING job through its stages.
    ///
    /// This is the only writer of COMPLETED for the job and calls `fail` at
    /// most once. Callers must not transition the job again after a
    /// `Completed` or `Failed` outcome.
    pub async fn run(
        &self,
        job_id: &str,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        let span = info_span!("pipeline",
            job_id = %job.id,
            url = %sanitize::redact_url(&job.source_url),
            post_action = ?job.options.post_action,
        );

        let mut ctx = PipelineContext::new(job);
        let halted = self.execute(&mut ctx, &cancel).instrument(span.clone()).await;

        let outcome = match halted {
            Ok(()) => Ok(PipelineOutcome::Completed {
                outputs: ctx.outputs.clone(),
            }),
            Err(Halt::Cancelled) => {
                self.finish_cancelled(&mut ctx).instrument(span.clone()).await;
                Ok(PipelineOutcome::Cancelled)
            }
            Err(Halt::Failed(error)) => {
                self.finish_failed(&mut ctx, error)
                    .instrument(span.clone())
                    .await
            }
            Err(Halt::Store(e)) => Err(PipelineError::Store(e)),
        };

        for warning in &ctx.warnings {
            span.in_scope(|| warn!(%warning, "Pipeline warning"));
        }
        outcome
    }

    async fn execute(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        // Step 1: Download
        let download_options = StageOptions::for_job(&ctx.job, cancel.clone());
        let downloaded = self
            .run_stage(
                ctx,
                cancel,
                JobStatus::Downloading,
                &self.stages.download,
                download_options,
                "Downloading",
            )
            .await?;
        let video = downloaded.primary_path();
        self.complete_stage(ctx, JobStatus::Downloading, "video", downloaded)
            .await;

        match ctx.job.options.post_action {
            PostAction::None => {}

            // Step 2: Extract audio only
            PostAction::Extract => {
                let options = StageOptions::for_job(&ctx.job, cancel.clone())
                    .with_input(video.clone())
                    .with_wav(false);
                let audio = self
                    .run_stage(
                        ctx,
                        cancel,
                        JobStatus::Extracting,
                        &self.stages.extract,
                        options,
                        "Extracting audio",
                    )
                    .await?;
                self.complete_stage(ctx, JobStatus::Extracting, "audio", audio)
                    .await;
            }

            // Step 2+3: Extract audio with WAV, then transcribe
            PostAction::Transcribe => {
                let options = StageOptions::for_job(&ctx.job, cancel.clone())
                    .with_input(video.clone())
                    .with_wav(true);
                let audio = self
                    .run_stage(
                        ctx,
                        cancel,
                        JobStatus::Extracting,
                        &self.stages.extract,
                        options,
                        "Extracting audio",
                    )
                    .await?;
                let transcribe_input = audio
                    .path_field("wavPath")
                    .or_else(|| audio.path_field("mp3Path"))
                    .or_else(|| audio.primary_path());
                self.complete_stage(ctx, JobStatus::Extracting, "audio", audio)
                    .await;

                let Some(transcribe_input) = transcribe_input else {
                    return Err(Halt::Failed(StageError::new(
                        codes::AUDIO_MISSING,
                        "Audio extraction produced no WAV or MP3 file",
                    )));
                };

                let options = StageOptions::for_job(&ctx.job, cancel.clone())
                    .with_input(Some(transcribe_input));
                let transcript = self
                    .run_stage(
                        ctx,
                        cancel,
                        JobStatus::Transcribing,
                        &self.stages.transcribe,
                        options,
                        "Transcribing",
                    )
                    .await?;
                self.complete_stage(ctx, JobStatus::Transcribing, "transcript", transcript)
                    .await;

                if !ctx.job.options.keep_video {
                    if let Some(video) = &video {
                        remove_source_video(ctx, video).await;
                    }
                }
            }
        }

        // Step 4: Pack
        self.pack(ctx, cancel).await
    }

    /// Moves the job into `stage`, runs `adapter` and forwards its progress.
    async fn run_stage(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationToken,
        stage: JobStatus,
        adapter: &Arc<dyn StageAdapter>,
        options: StageOptions,
        message: &str,
    ) -> Result<StageResult, Halt> {
        self.enter_stage(ctx, cancel, stage, message).await?;

        let span = info_span!("stage", stage = %stage, adapter = adapter.name());
        let (sink, reports) = ProgressSink::channel();
        let forwarder = ProgressForwarder::new(Arc::clone(&self.store), &ctx.job.id);
        let execution =
            AssertUnwindSafe(adapter.execute(&ctx.job, &options, sink)).catch_unwind();

        let result = match forwarder.drive(execution, reports).instrument(span).await {
            Ok(result) => result,
            Err(panic) => Err(StageError::from_panic(panic)),
        };

        match result {
            Ok(result) => Ok(result),
            Err(_) if self.cancelled(ctx, cancel) => Err(Halt::Cancelled),
            Err(error) => Err(Halt::Failed(error.classify())),
        }
    }

    async fn enter_stage(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationToken,
        stage: JobStatus,
        message: &str,
    ) -> Result<(), Halt> {
        if self.cancelled(ctx, cancel) {
            return Err(Halt::Cancelled);
        }
        self.transition(ctx, stage, TransitionContext::message(message))?;

        ctx.metadata.start_stage(stage);
        self.snapshot(ctx).await;
        self.log(ctx, stage, StageLogKind::Started, message);
        Ok(())
    }

    fn transition(
        &self,
        ctx: &mut PipelineContext,
        stage: JobStatus,
        context: TransitionContext,
    ) -> Result<(), Halt> {
        match self.store.advance_stage(&ctx.job.id, stage, context) {
            Ok(true) => {
                ctx.current = stage;
                Ok(())
            }
            Ok(false) => {
                // Only terminal jobs can be removed, so the job was stopped elsewhere.
                warn!(stage = %stage, "Job disappeared from the store");
                Err(Halt::Cancelled)
            }
            Err(JobError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => Err(Halt::Cancelled),
            Err(e) => Err(Halt::Store(e)),
        }
    }

    /// Trips on a cancelled token or a job cancelled through the store.
    ///
    /// A tripped token whose job is still live (pool shutdown) cancels the job.
    fn cancelled(&self, ctx: &PipelineContext, cancel: &CancellationToken) -> bool {
        let status = self.store.get(&ctx.job.id).map(|job| job.status);
        if matches!(status, None | Some(JobStatus::Cancelled)) {
            return true;
        }
        if !cancel.is_cancelled() {
            return false;
        }
        if let Err(e) = self.store.cancel(&ctx.job.id, Some("Cancelled")) {
            warn!(error = %e, "Failed to cancel job after token was tripped");
        }
        true
    }

    async fn complete_stage(
        &self,
        ctx: &mut PipelineContext,
        stage: JobStatus,
        output_key: &str,
        result: StageResult,
    ) {
        if let Err(e) = self
            .store
            .record_output(&ctx.job.id, output_key, result.value.clone())
        {
            warn!(error = %e, output = output_key, "Failed to record output");
        }
        ctx.outputs.insert(output_key.to_string(), result.value.clone());
        ctx.metadata.complete_stage(stage, Some(result.value));
        self.snapshot(ctx).await;
        self.log(ctx, stage, StageLogKind::Completed, format!("{} finished", stage));
    }

    async fn pack(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        self.enter_stage(ctx, cancel, JobStatus::Packing, "Writing metadata")
            .await?;

        let mut final_snapshot = ctx.metadata.clone();
        let outputs = Value::Object(ctx.outputs.clone().into_iter().collect());
        final_snapshot.complete_stage(JobStatus::Packing, Some(outputs));
        final_snapshot.mark_completed();

        let path = self.config.metadata_path(&ctx.job.output_directory);
        write_metadata(&path, &final_snapshot).await.map_err(|e| {
            Halt::Failed(
                StageError::new(codes::METADATA_WRITE_FAILED, e.to_string())
                    .with_detail("path", path.to_string_lossy().into_owned()),
            )
        })?;
        ctx.metadata = final_snapshot;

        self.transition(
            ctx,
            JobStatus::Completed,
            TransitionContext::message("Completed").with_progress(100.0),
        )?;
        ctx.mark_terminal();
        self.log(ctx, JobStatus::Packing, StageLogKind::Completed, "Job completed");

        info!(outputs = ctx.outputs.len(), "Pipeline completed");
        Ok(())
    }

    async fn finish_failed(
        &self,
        ctx: &mut PipelineContext,
        error: StageError,
    ) -> Result<PipelineOutcome, PipelineError> {
        let info = error.to_error_info();
        warn!(
            code = %info.code,
            message = %info.message,
            stage = %ctx.current,
            "Pipeline failed"
        );

        let stage = ctx.current;
        ctx.metadata.fail_stage(stage, &info);
        self.snapshot(ctx).await;
        self.log(ctx, stage, StageLogKind::Failed, info.message.clone());

        if ctx.terminal_reached() {
            debug!("Job already terminal, not failing it again");
            return Ok(PipelineOutcome::Failed { error: info });
        }

        match self.store.fail(&ctx.job.id, info.clone()) {
            Ok(_) => {
                ctx.mark_terminal();
                Ok(PipelineOutcome::Failed { error: info })
            }
            Err(JobError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => Ok(PipelineOutcome::Cancelled),
            Err(e) => Err(PipelineError::Store(e)),
        }
    }

    async fn finish_cancelled(&self, ctx: &mut PipelineContext) {
        info!(stage = %ctx.current, "Pipeline cancelled");
        // Cancelled before the first stage was entered.
        if !ctx.current.is_in_progress() {
            return;
        }
        let stage = ctx.current;
        ctx.metadata.cancel_stage(stage);
        self.snapshot(ctx).await;
        self.log(ctx, stage, StageLogKind::Cancelled, "Cancelled");
    }

    /// Best-effort snapshot; a failure becomes a warning.
    async fn snapshot(&self, ctx: &mut PipelineContext) {
        let path = self.config.metadata_path(&ctx.job.output_directory);
        if let Err(e) = write_metadata(&path, &ctx.metadata).await {
            ctx.warnings.push(PipelineWarning::MetadataWriteFailed {
                stage: ctx.metadata.stage.clone(),
                error: e.to_string(),
            });
        }
    }

    fn log(
        &self,
        ctx: &PipelineContext,
        stage: JobStatus,
        kind: StageLogKind,
        message: impl Into<String>,
    ) {
        self.stage_log
            .append(StageLogEntry::new(&ctx.job.id, stage, kind, message));
    }
}

async fn remove_source_video(ctx: &mut PipelineContext, video: &Path) {
    match tokio::fs::remove_file(video).await {
        Ok(()) => debug!(file = %sanitize::redact_path(video), "Removed source video"),
        Err(e) => ctx.warnings.push(PipelineWarning::SourceCleanupFailed {
            path: PathBuf::from(video),
            error: e.to_string(),
        }),
    }
}
