//! Job lifecycle states and the legal transitions between them.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Downloading,
    Extracting,
    Transcribing,
    Packing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Pending,
        JobStatus::Downloading,
        JobStatus::Extracting,
        JobStatus::Transcribing,
        JobStatus::Packing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// States reachable from `self` in one step.
    ///
    /// DOWNLOADING -> PACKING and EXTRACTING -> PACKING exist for jobs whose
    /// post-action skips the later stages.
    pub fn next_states(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Pending => &[Downloading, Cancelled, Failed],
            Downloading => &[Extracting, Packing, Failed, Cancelled],
            Extracting => &[Transcribing, Packing, Failed, Cancelled],
            Transcribing => &[Packing, Failed, Cancelled],
            Packing => &[Completed, Failed, Cancelled],
            Completed => &[],
            Failed => &[Pending],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        self.next_states().contains(&next)
    }

    /// COMPLETED, FAILED and CANCELLED. FAILED still allows the retry edge.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// True for the stages during which an adapter may be running.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            JobStatus::Downloading
                | JobStatus::Extracting
                | JobStatus::Transcribing
                | JobStatus::Packing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Downloading => "DOWNLOADING",
            JobStatus::Extracting => "EXTRACTING",
            JobStatus::Transcribing => "TRANSCRIBING",
            JobStatus::Packing => "PACKING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
