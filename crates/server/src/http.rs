//! Webhook surface, health/readiness and metrics endpoints (§4.6, §6
//! "Webhook surface").

use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{BoxError, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::verify_webhook_signature;
use crate::error::ServerError;
use crate::inbound::{accept_incoming_call, hangup_by_external_id, IncomingCall};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.timeout_seconds);
    Router::new()
        .route("/webhooks/call/incoming", post(incoming_call))
        .route("/webhooks/call/hangup", post(hangup))
        .route("/webhooks/call/event", post(event))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .timeout(timeout),
        )
        .with_state(state)
}

async fn handle_timeout_error(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "unhandled server error")
    }
}

fn verify_signature(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ServerError> {
    let Some(secret) = &state.config.server.webhook_auth.signing_secret else {
        return Ok(());
    };
    let header_name = &state.config.server.webhook_auth.signature_header;
    let signature = headers
        .get(header_name.as_str())
        .and_then(|value| value.to_str().ok())
        .ok_or(ServerError::InvalidSignature)?;
    verify_webhook_signature(secret, body, signature)
}

#[derive(Debug, Deserialize)]
struct IncomingCallRequest {
    call_id: String,
    caller_id: String,
    callee_id: String,
    #[allow(dead_code)]
    provider: String,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
struct AudioBridgeInfo {
    host: String,
    port: u16,
}

#[derive(Debug, Serialize)]
struct IncomingCallResponse {
    success: bool,
    action: &'static str,
    audio_bridge: AudioBridgeInfo,
    internal_call_id: String,
}

async fn incoming_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ServerError> {
    verify_signature(&state, &headers, &body)?;
    let request: IncomingCallRequest =
        serde_json::from_slice(&body).map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

    let metadata = match request.metadata {
        Some(Value::Object(map)) => map.into_iter().collect(),
        _ => Default::default(),
    };

    let handler = accept_incoming_call(
        &state,
        IncomingCall {
            caller: request.caller_id,
            callee: request.callee_id,
            external_id: request.call_id,
            metadata,
        },
    )?;

    Ok(Json(IncomingCallResponse {
        success: true,
        action: "answer",
        audio_bridge: AudioBridgeInfo {
            host: state.config.server.host.clone(),
            port: state.config.server.audio_bridge_port,
        },
        internal_call_id: handler.context().call_id,
    }))
}

#[derive(Debug, Deserialize)]
struct HangupRequest {
    call_id: String,
    #[allow(dead_code)]
    event: String,
}

#[derive(Debug, Serialize)]
struct HangupResponse {
    success: bool,
}

async fn hangup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ServerError> {
    verify_signature(&state, &headers, &body)?;
    let request: HangupRequest =
        serde_json::from_slice(&body).map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
    hangup_by_external_id(&state, &request.call_id).await?;
    Ok(Json(HangupResponse { success: true }))
}

#[derive(Debug, Deserialize)]
struct EventRequest {
    call_id: String,
    event: String,
    #[allow(dead_code)]
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Serialize)]
struct EventResponse {
    success: bool,
    action: &'static str,
}

async fn event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ServerError> {
    verify_signature(&state, &headers, &body)?;
    let request: EventRequest =
        serde_json::from_slice(&body).map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

    let handler = state.calls.get_by_external_id(&request.call_id)?;
    let action = match request.event.as_str() {
        "speech_detected" => {
            handler.on_speech_detected()?;
            "continue"
        }
        "transfer_complete" => {
            handler.on_transfer_complete()?;
            "ended"
        }
        "timeout" => {
            handler.on_timeout()?;
            "continue"
        }
        other => {
            tracing::warn!(event = %other, "unhandled webhook call event");
            "continue"
        }
    };

    Ok(Json(EventResponse { success: true, action }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    active_calls: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok", active_calls: state.calls.len() }))
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    llm_available: bool,
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let llm_available = state.engine.llm_available();
    let status = if llm_available { "ready" } else { "not_ready" };
    let code = if llm_available { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(ReadyResponse { status, llm_available }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phone_agent_config::{ProviderMode, Settings};

    fn test_state() -> Arc<AppState> {
        let mut settings = Settings::default();
        settings.providers.mode = ProviderMode::Local;
        Arc::new(AppState::new(settings).unwrap())
    }

    #[test]
    fn verify_signature_is_a_noop_without_a_configured_secret() {
        let state = test_state();
        assert!(verify_signature(&state, &HeaderMap::new(), b"body").is_ok());
    }

    #[test]
    fn verify_signature_rejects_a_missing_header_when_a_secret_is_configured() {
        let mut state = (*test_state()).clone();
        state.config = Arc::new({
            let mut settings = (*state.config).clone();
            settings.server.webhook_auth.signing_secret = Some("secret".to_string());
            settings
        });
        assert!(verify_signature(&state, &HeaderMap::new(), b"body").is_err());
    }
}
