//! Test harness for isolated pipeline execution.
//!
//! The `TestHarness` struct provides:
//! - A temporary directory that job output directories live under
//! - A shared `JobStore` with a listener recording every event
//! - Helpers to wait for asynchronously delivered events

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use mediaflow::broadcast::JobEventPayload;
use mediaflow::pipeline::{read_metadata, JobMetadata, PipelineConfig, StageLog, StageLogEntry};
use mediaflow::{JobEvent, JobStatus, JobStore, Pipeline, StageSet, WorkerPool};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Collects stage log entries in memory.
#[derive(Default)]
pub struct MemoryStageLog {
    entries: Mutex<Vec<StageLogEntry>>,
}

impl MemoryStageLog {
    pub fn entries(&self) -> Vec<StageLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl StageLog for MemoryStageLog {
    fn append(&self, entry: StageLogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub store: Arc<JobStore>,
    pub stage_log: Arc<MemoryStageLog>,
    events: Arc<Mutex<Vec<JobEvent>>>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(JobStore::new(64));
        let events = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&events);
        store
            .subscribe(move |event: &JobEvent| {
                recorded.lock().unwrap().push(event.clone());
            })
            .expect("Failed to subscribe recording listener");

        Self {
            temp_dir,
            store,
            stage_log: Arc::new(MemoryStageLog::default()),
            events,
        }
    }

    /// A fresh output directory path for one job (not created).
    pub fn job_dir(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn pipeline(&self, stages: StageSet) -> Pipeline {
        Pipeline::new(
            Arc::new(PipelineConfig::default()),
            Arc::clone(&self.store),
            stages,
        )
        .with_stage_log(self.stage_log.clone())
    }

    pub fn pool(&self, stages: StageSet) -> WorkerPool {
        WorkerPool::new(Arc::new(self.pipeline(stages)))
    }

    pub fn metadata_path(&self, job_id: &str) -> PathBuf {
        let job = self.store.get(job_id).expect("job exists");
        PipelineConfig::default().metadata_path(&job.output_directory)
    }

    pub async fn metadata(&self, job_id: &str) -> JobMetadata {
        read_metadata(&self.metadata_path(job_id))
            .await
            .expect("metadata snapshot readable")
    }

    pub fn events_for(&self, job_id: &str) -> Vec<JobEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn transitions_for(&self, job_id: &str) -> Vec<(JobStatus, JobStatus)> {
        self.events_for(job_id)
            .iter()
            .filter_map(JobEvent::transition)
            .collect()
    }

    /// Progress percentages reported while the job was in `stage`.
    pub fn progress_in(&self, job_id: &str, stage: JobStatus) -> Vec<f64> {
        let mut current = JobStatus::Pending;
        let mut percents = Vec::new();
        for event in self.events_for(job_id) {
            match event.payload {
                JobEventPayload::StageChanged { new_status, .. } => current = new_status,
                JobEventPayload::ProgressUpdated { percent, .. } if current == stage => {
                    percents.push(percent)
                }
                _ => {}
            }
        }
        percents
    }

    /// Blocks until the job's stage changes end in `status`.
    pub fn wait_for_status(&self, job_id: &str, status: JobStatus) -> Vec<(JobStatus, JobStatus)> {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            let transitions = self.transitions_for(job_id);
            if transitions.last().map(|(_, new)| *new) == Some(status) {
                return transitions;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} on job {}, saw {:?}",
                status,
                job_id,
                transitions
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Async variant of [`TestHarness::wait_for_status`].
    pub async fn settle(&self, job_id: &str, status: JobStatus) -> Vec<(JobStatus, JobStatus)> {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            let transitions = self.transitions_for(job_id);
            if transitions.last().map(|(_, new)| *new) == Some(status) {
                return transitions;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} on job {}, saw {:?}",
                status,
                job_id,
                transitions
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
