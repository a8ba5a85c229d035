use thiserror::Error;

/// Error taxonomy shared by the whole dataplane. Front-end adapters map
/// these onto their wire protocol's status codes; per-request failures ride
/// inside an [`crate::InferenceResponse`] instead of unwinding across the
/// worker thread boundary, which is why the type is `Clone`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
