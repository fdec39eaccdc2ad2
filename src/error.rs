use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Runner not found: {0}")]
    RunnerNotFound(u64),

    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
