pub mod cadence;
pub mod operations;
pub mod registry;
pub mod tasks;

use thiserror::Error;

use studybell_common::error::AppError;

pub use cadence::Cadence;
pub use operations::Operations;
pub use registry::{JobKind, JobRegistry, JobState, JobStatus, RunReport, TaskFn, task};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unknown job '{0}'")]
    UnknownJob(String),

    #[error("Job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("Invalid cadence: {0}")]
    InvalidCadence(String),
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::UnknownJob(_) => AppError::NotFound(err.to_string()),
            SchedulerError::DuplicateJob(_) | SchedulerError::InvalidCadence(_) => {
                AppError::Validation(err.to_string())
            }
        }
    }
}
