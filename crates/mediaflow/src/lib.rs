pub mod broadcast;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod sanitize;
pub mod stage;
pub mod worker;

pub use broadcast::{
    EventBus, JobEvent, JobEventKind, JobStore, SubscriptionHandle, TransitionContext,
};
pub use config::{load_config, load_config_from_str, Config, LoggingConfig};
pub use error::{ConfigError, JobError, MediaflowError, Result, StorageError, WorkerError};
pub use logging::init_logging;
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineOutcome};
pub use stage::{
    codes, ProgressSink, StageAdapter, StageError, StageOptions, StageProgress, StageResult,
    StageSet,
};
pub use worker::{Job, JobOptions, JobRunReport, JobSpec, JobStatus, PostAction, WorkerPool};
