//! Error taxonomy shared by the store, manager, and scheduler.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Distinguishable error kinds surfaced to callers.
///
/// `NotFound`, `Validation`, and `Conflict` propagate to the caller as-is.
/// `Persistence` wraps store/transaction failures unchanged. `Scheduling`
/// only ever exists inside the reconciler's firing path — it is logged and
/// swallowed there and never crosses the timer loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("scheduling: {0}")]
    Scheduling(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Error::Validation(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Error::Conflict(what.into())
    }
}

// Malformed payload / default-inputs documents are caller input problems.
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(e.to_string())
    }
}
