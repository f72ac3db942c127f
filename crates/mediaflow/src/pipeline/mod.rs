pub mod config;
pub mod context;
pub mod error;
pub mod metadata;
pub mod progress;
pub mod runner;
pub mod stage_log;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::{PipelineError, PipelineWarning};
pub use metadata::{read_metadata, write_metadata, JobMetadata, StageRecord, StageRecordStatus};
pub use progress::ProgressForwarder;
pub use runner::{Pipeline, PipelineOutcome};
pub use stage_log::{StageLog, StageLogEntry, StageLogKind, TracingStageLog};
