use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{trace, warn};

use crate::broadcast::JobStore;
use crate::stage::StageProgress;

/// Applies stage progress reports to the job store.
pub struct ProgressForwarder {
    store: Arc<JobStore>,
    job_id: String,
}

impl ProgressForwarder {
    pub fn new(store: Arc<JobStore>, job_id: &str) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
        }
    }

    pub fn apply(&self, progress: &StageProgress) {
        trace!(
            percent = progress.percent,
            speed = ?progress.speed,
            eta = ?progress.eta,
            "Stage progress"
        );
        if let Err(e) =
            self.store
                .update_progress(&self.job_id, progress.percent, 100.0, &progress.message)
        {
            warn!(job_id = %self.job_id, error = %e, "Progress update rejected");
        }
    }

    /// Polls `stage` to completion while forwarding every report from
    /// `reports`. Reports still queued when the stage finishes are applied
    /// before returning.
    pub async fn drive<F: Future>(
        &self,
        stage: F,
        mut reports: UnboundedReceiver<StageProgress>,
    ) -> F::Output {
        tokio::pin!(stage);
        let mut open = true;

        let output = loop {
            tokio::select! {
                biased;
                output = &mut stage => break output,
                report = reports.recv(), if open => match report {
                    Some(progress) => self.apply(&progress),
                    None => open = false,
                },
            }
        };

        while let Ok(progress) = reports.try_recv() {
            self.apply(&progress);
        }
        output
    }
}
