use thiserror::Error;

/// Top-level error type for the Daylock runtime.
///
/// Job-body failures are not represented here: the scheduler treats them as
/// data (persisted `error_message` text), not as errors that propagate.
#[derive(Debug, Error)]
pub enum DaylockError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(String),
}
