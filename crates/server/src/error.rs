//! Errors raised by the telephony adapter.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unknown call: {0}")]
    UnknownCall(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed softswitch event: {0}")]
    SoftswitchEvent(String),

    #[error("audio bridge protocol error: {0}")]
    Bridge(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Core(#[from] phone_agent_core::Error),

    #[error(transparent)]
    Persistence(#[from] phone_agent_persistence::PersistenceError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status: StatusCode = (&self).into();
        let body = Json(serde_json::json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<&ServerError> for StatusCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::UnknownCall(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ServerError::SoftswitchEvent(_) | ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Bridge(_) => StatusCode::BAD_REQUEST,
            ServerError::Core(_) | ServerError::Persistence(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
