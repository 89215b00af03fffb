//! Errors raised by the reference persistence layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to connect to ScyllaDB: {0}")]
    Connection(#[from] scylla::transport::errors::NewSessionError),

    #[error("ScyllaDB query failed: {0}")]
    Query(#[from] scylla::transport::errors::QueryError),

    #[error("schema setup failed: {0}")]
    Schema(String),

    #[error("row did not match the expected shape: {0}")]
    InvalidData(String),

    #[error("record not found")]
    NotFound,
}

impl From<PersistenceError> for phone_agent_core::Error {
    fn from(err: PersistenceError) -> Self {
        phone_agent_core::Error::Other(err.to_string())
    }
}
