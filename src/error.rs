//! Core error taxonomy.
//!
//! `CoreError` realises the kinds of failure the engine is required to
//! distinguish. `InternalInvariant` violations are programmer error and are
//! not represented here; callers that detect one should `panic!` directly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("unknown symbol: {0}")]
    InvalidSymbol(String),

    #[error("data quality issue: {0}")]
    DataQuality(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return CoreError::RateLimited {
                    retry_after_secs: 1,
                };
            }
            if status.is_server_error() {
                return CoreError::Transient(err.to_string());
            }
        }
        if err.is_timeout() || err.is_connect() {
            CoreError::Transient(err.to_string())
        } else {
            CoreError::Transient(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::PersistenceFailure(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
