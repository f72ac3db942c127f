pub mod job;
pub mod pool;
pub mod status;

pub use job::{
    Acceleration, Job, JobErrorInfo, JobOptions, JobOutputs, JobSpec, PostAction, Progress,
};
pub use pool::{JobRunReport, WorkerPool};
pub use status::JobStatus;
