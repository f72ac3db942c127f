use std::collections::BTreeMap;

use serde_json::Value;

use crate::worker::job::Job;
use crate::worker::status::JobStatus;

use super::error::PipelineWarning;
use super::metadata::JobMetadata;

pub struct PipelineContext {
    // Snapshot of the job taken when the run started
    pub job: Job,

    // Status the pipeline last moved the job into
    pub current: JobStatus,

    // Outputs recorded so far, mirrored into the store
    pub outputs: BTreeMap<String, Value>,

    pub metadata: JobMetadata,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,

    // Set once this run has written COMPLETED or FAILED
    terminal_reached: bool,
}

impl PipelineContext {
    pub fn new(job: Job) -> Self {
        let metadata = JobMetadata::for_job(&job);
        Self {
            current: job.status,
            job,
            outputs: BTreeMap::new(),
            metadata,
            warnings: Vec::new(),
            terminal_reached: false,
        }
    }

    pub fn mark_terminal(&mut self) {
        self.terminal_reached = true;
    }

    pub fn terminal_reached(&self) -> bool {
        self.terminal_reached
    }
}
