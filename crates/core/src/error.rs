//! Core error type
//!
//! Every fallible boundary in the core returns this (or a crate-local error
//! that converts into it). Never surfaced to a caller verbatim — callers map
//! it to a localized, caller-facing apology instead (see
//! `phone_agent_core::policy::apology_text`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid call state transition: {from:?} on {event:?}")]
    InvalidTransition { from: String, event: String },

    #[error("no active call for handler")]
    NoActiveCall,

    #[error("call already active, rejecting concurrent incoming call")]
    ConcurrentCall,

    #[error("unknown call id: {0}")]
    UnknownCall(String),

    #[error("retry exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("circuit '{name}' is open, resets at {reset_at}")]
    CircuitOpen {
        name: String,
        reset_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("deadline exceeded after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors that represent a transient condition worth retrying.
    /// Used as the default `retryable` predicate for `RetryPolicy`.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::Timeout(_))
    }
}
