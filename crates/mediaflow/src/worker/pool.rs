use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{JobStore, TransitionContext};
use crate::error::{JobError, WorkerError};
use crate::pipeline::{Pipeline, PipelineError, PipelineOutcome};
use crate::worker::job::{Job, JobOptions, JobSpec};
use crate::worker::status::JobStatus;

/// Result of one pipeline run.
#[derive(Debug)]
pub struct JobRunReport {
    pub job_id: String,
    pub outcome: Result<PipelineOutcome, PipelineError>,
}

type RunningJobs = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Runs each submitted job as its own tokio task.
pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    store: Arc<JobStore>,
    defaults: JobOptions,
    running: RunningJobs,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    result_sender: mpsc::UnboundedSender<JobRunReport>,
    result_receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobRunReport>>,
    shutdown: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Worker pool lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self::with_defaults(pipeline, JobOptions::default())
    }

    /// Creates a pool that fills in `defaults` for jobs created without options.
    pub fn with_defaults(pipeline: Arc<Pipeline>, defaults: JobOptions) -> Self {
        let store = Arc::clone(pipeline.store());
        let (result_sender, result_receiver) = mpsc::unbounded_channel();
        Self {
            pipeline,
            store,
            defaults,
            running: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(Vec::new()),
            result_sender,
            result_receiver: tokio::sync::Mutex::new(result_receiver),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Adds a job to the store and starts its pipeline.
    pub fn create_job(&self, spec: JobSpec) -> Result<Job, WorkerError> {
        if self.shutdown.is_cancelled() {
            return Err(WorkerError::ShutDown);
        }
        let job = self.store.add(spec.with_defaults(&self.defaults))?;
        self.submit(&job.id)?;
        Ok(job)
    }

    /// Starts the pipeline for a PENDING job.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.shutdown.is_cancelled() {
            return Err(WorkerError::ShutDown);
        }

        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(WorkerError::Job(JobError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to: JobStatus::Downloading,
            }));
        }

        let runtime =
            Handle::try_current().map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
        let token = self.reserve(job_id)?;
        self.spawn(&runtime, job_id, token);
        Ok(())
    }

    /// Moves a FAILED job back to PENDING and runs it again from the start.
    ///
    /// The job keeps its FAILED status when the rerun cannot be started,
    /// including while its previous run is still winding down.
    pub fn retry(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.shutdown.is_cancelled() {
            return Err(WorkerError::ShutDown);
        }

        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))?;
        if job.status != JobStatus::Failed {
            return Err(WorkerError::NotRetryable {
                job_id: job.id,
                status: job.status,
            });
        }

        let runtime =
            Handle::try_current().map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
        let token = self.reserve(job_id)?;
        match self.store.advance_stage(
            job_id,
            JobStatus::Pending,
            TransitionContext::message("Queued for retry"),
        ) {
            Ok(true) => {
                self.spawn(&runtime, job_id, token);
                Ok(())
            }
            Ok(false) => {
                self.release(job_id);
                Err(WorkerError::JobNotFound(job_id.to_string()))
            }
            Err(e) => {
                self.release(job_id);
                Err(e.into())
            }
        }
    }

    /// Cancels a job and signals its running adapter, if any.
    ///
    /// Returns `Ok(false)` when the job is unknown or already terminal.
    pub fn cancel(&self, job_id: &str, reason: Option<&str>) -> Result<bool, WorkerError> {
        let cancelled = self.store.cancel(job_id, reason)?;
        if let Some(token) = lock(&self.running).get(job_id) {
            token.cancel();
        }
        Ok(cancelled)
    }

    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        lock(&self.running).contains_key(job_id)
    }

    /// Waits for the next finished run.
    pub async fn recv_result(&self) -> Option<JobRunReport> {
        self.result_receiver.lock().await.recv().await
    }

    pub fn try_recv_result(&self) -> Option<JobRunReport> {
        self.result_receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Stops accepting jobs and cancels every running one.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Waits until every spawned run has finished.
    pub async fn wait(&self) {
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Job task panicked: {}", e);
            }
        }
        info!("All job tasks have stopped");
    }

    /// Claims the running slot for a job.
    fn reserve(&self, job_id: &str) -> Result<CancellationToken, WorkerError> {
        let mut running = lock(&self.running);
        if running.contains_key(job_id) {
            return Err(WorkerError::AlreadyRunning(job_id.to_string()));
        }
        let token = self.shutdown.child_token();
        running.insert(job_id.to_string(), token.clone());
        Ok(token)
    }

    fn release(&self, job_id: &str) {
        lock(&self.running).remove(job_id);
    }

    /// Spawns the pipeline task for a job whose slot is already reserved.
    fn spawn(&self, runtime: &Handle, job_id: &str, token: CancellationToken) {
        let pipeline = Arc::clone(&self.pipeline);
        let running = Arc::clone(&self.running);
        let results = self.result_sender.clone();
        let id = job_id.to_string();

        let handle = runtime.spawn(async move {
            debug!("Job {} started", id);
            let outcome = pipeline.run(&id, token).await;

            match &outcome {
                Ok(PipelineOutcome::Completed { .. }) => info!("Job {} completed", id),
                Ok(PipelineOutcome::Failed { error }) => {
                    info!("Job {} failed: {} ({})", id, error.message, error.code)
                }
                Ok(PipelineOutcome::Cancelled) => info!("Job {} cancelled", id),
                Err(e) => error!("Job {} pipeline error: {}", id, e),
            }

            lock(&running).remove(&id);
            if results
                .send(JobRunReport {
                    job_id: id.clone(),
                    outcome,
                })
                .is_err()
            {
                debug!("Result receiver dropped, discarding report for job {}", id);
            }
        });

        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}
