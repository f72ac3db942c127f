//! In-memory job registry and state machine.
//!
//! The store is the only writer of job status. Each mutation validates and
//! applies the change and publishes its event inside one write-lock critical
//! section, so concurrent callers can never both pass the transition check
//! for the same job and per-job event order matches call order.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::broadcast::event_bus::{EventBus, JobEventListener, SubscriptionHandle};
use crate::broadcast::job_event::JobEvent;
use crate::error::{JobError, WorkerError};
use crate::worker::job::{Job, JobErrorInfo, JobOutputs, JobSpec, Progress};
use crate::worker::status::JobStatus;

/// Optional data merged into a job on a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Starting progress for the new status (defaults to 0).
    pub progress: Option<f64>,
    pub message: Option<String>,
    /// Only kept when the new status is FAILED.
    pub error: Option<JobErrorInfo>,
}

impl TransitionContext {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn error(error: JobErrorInfo) -> Self {
        Self {
            message: Some(error.message.clone()),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }
}

pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
    bus: EventBus,
}

impl JobStore {
    /// Creates an empty store whose lossy event stream buffers `stream_capacity` events.
    pub fn new(stream_capacity: usize) -> Self {
        Self::with_bus(EventBus::new(stream_capacity))
    }

    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            bus,
        }
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<String, Job>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Validates `spec` and registers a new PENDING job.
    pub fn add(&self, spec: JobSpec) -> Result<Job, JobError> {
        spec.validate()?;

        let mut jobs = self.write_jobs();
        if let Some(id) = &spec.id {
            if jobs.contains_key(id) {
                return Err(JobError::validation(format!("job id '{}' already exists", id)));
            }
        }

        let job = Job::from_spec(spec);
        jobs.insert(job.id.clone(), job.clone());
        self.bus.publish(JobEvent::created(&job));

        log::debug!("Job {} created", job.id);
        Ok(job)
    }

    /// Moves a job to `new_status`.
    ///
    /// Returns `Ok(false)` for an unknown job and
    /// [`JobError::InvalidTransition`] for an edge outside the adjacency list,
    /// in which case the job is left untouched.
    pub fn advance_stage(
        &self,
        id: &str,
        new_status: JobStatus,
        context: TransitionContext,
    ) -> Result<bool, JobError> {
        let mut jobs = self.write_jobs();
        let Some(job) = jobs.get_mut(id) else {
            log::warn!("advance_stage: job {} not found", id);
            return Ok(false);
        };

        let old_status = job.status;
        if !old_status.can_transition_to(new_status) {
            return Err(JobError::InvalidTransition {
                job_id: id.to_string(),
                from: old_status,
                to: new_status,
            });
        }

        let now = Utc::now();
        job.status = new_status;
        job.updated_at = now;
        job.stage_start_time = Some(now);
        job.progress = Progress {
            current: context.progress.unwrap_or(0.0).clamp(0.0, 100.0),
            total: 100.0,
            message: context.message.unwrap_or_default(),
        };

        if new_status == JobStatus::Failed {
            job.error = Some(
                context
                    .error
                    .unwrap_or_else(|| JobErrorInfo::new("UNKNOWN_ERROR", "Job failed")),
            );
        } else {
            job.error = None;
        }

        if old_status == JobStatus::Failed && new_status == JobStatus::Pending {
            job.result = JobOutputs::default();
        }

        self.bus
            .publish(JobEvent::stage_changed(id, old_status, new_status));

        log::debug!("Job {} {} -> {}", id, old_status, new_status);
        Ok(true)
    }

    /// Marks a job FAILED. Failing an already FAILED job is an invalid transition.
    pub fn fail(&self, id: &str, error: JobErrorInfo) -> Result<bool, JobError> {
        self.advance_stage(id, JobStatus::Failed, TransitionContext::error(error))
    }

    /// Cancels a job. Returns `Ok(false)` when the job is unknown or already terminal.
    pub fn cancel(&self, id: &str, reason: Option<&str>) -> Result<bool, JobError> {
        let status = match self.get(id) {
            Some(job) => job.status,
            None => return Ok(false),
        };
        if status.is_terminal() {
            log::debug!("cancel: job {} already {}", id, status);
            return Ok(false);
        }

        let context = TransitionContext::message(reason.unwrap_or("Cancelled"));
        match self.advance_stage(id, JobStatus::Cancelled, context) {
            // Another caller finished the job between the read and the transition.
            Err(JobError::InvalidTransition { from, .. }) if from.is_terminal() => Ok(false),
            other => other,
        }
    }

    /// Updates progress within the current stage without a status change.
    ///
    /// `current` is clamped to `[0, 100]` and never moves backwards within a
    /// stage. Only jobs in an in-progress status accept updates.
    pub fn update_progress(
        &self,
        id: &str,
        current: f64,
        total: f64,
        message: &str,
    ) -> Result<bool, JobError> {
        let mut jobs = self.write_jobs();
        let Some(job) = jobs.get_mut(id) else {
            log::warn!("update_progress: job {} not found", id);
            return Ok(false);
        };

        if !job.status.is_in_progress() {
            log::debug!(
                "update_progress: ignoring update for job {} in {}",
                id,
                job.status
            );
            return Ok(false);
        }

        let requested = if current.is_nan() { 0.0 } else { current };
        let percent = requested.clamp(0.0, 100.0).max(job.progress.current);
        job.progress.current = percent;
        if total.is_finite() && total > 0.0 {
            job.progress.total = total;
        }
        job.progress.message = message.to_string();
        job.updated_at = Utc::now();

        self.bus
            .publish(JobEvent::progress_updated(id, percent, message));
        Ok(true)
    }

    /// Stores an artifact reference under `result.outputs[key]`. Emits no event.
    pub fn record_output(&self, id: &str, key: &str, value: Value) -> Result<bool, JobError> {
        let mut jobs = self.write_jobs();
        match jobs.get_mut(id) {
            Some(job) => {
                job.result.outputs.insert(key.to_string(), value);
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => {
                log::warn!("record_output: job {} not found", id);
                Ok(false)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.read_jobs().get(id).cloned()
    }

    /// All jobs, oldest first.
    pub fn get_all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read_jobs().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    pub fn get_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.get_all()
            .into_iter()
            .filter(|job| job.status == status)
            .collect()
    }

    /// Deletes a terminal job. Returns `Ok(false)` when the job is unknown.
    pub fn remove(&self, id: &str) -> Result<bool, JobError> {
        let mut jobs = self.write_jobs();
        let Some(job) = jobs.get(id) else {
            return Ok(false);
        };
        if !job.status.is_terminal() {
            return Err(JobError::NotTerminal {
                job_id: id.to_string(),
                status: job.status,
            });
        }

        jobs.remove(id);
        self.bus.publish(JobEvent::removed(id));

        log::debug!("Job {} removed", id);
        Ok(true)
    }

    pub fn subscribe<L: JobEventListener>(
        &self,
        listener: L,
    ) -> Result<SubscriptionHandle, WorkerError> {
        self.bus.subscribe(listener)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.bus.unsubscribe(handle)
    }

    /// Lossy event stream for async forwarders.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.bus.stream()
    }

    /// Counts of (active, completed, failed) jobs.
    pub fn counts(&self) -> (usize, usize, usize) {
        let jobs = self.read_jobs();
        let mut active = 0;
        let mut completed = 0;
        let mut failed = 0;
        for job in jobs.values() {
            match job.status {
                JobStatus::Completed => completed += 1,
                JobStatus::Failed => failed += 1,
                JobStatus::Cancelled => {}
                _ => active += 1,
            }
        }
        (active, completed, failed)
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::with_bus(EventBus::default())
    }
}
