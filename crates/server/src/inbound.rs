//! Normalised inbound call handling shared by all three telephony backends
//! (§4.6: "All three, on an accepted inbound call, produce a normalised
//! `IncomingCall` ... and feed it to C5's `handle_incoming_call`").

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::call_handler::CallHandler;
use crate::error::ServerError;
use crate::registry::CallRegistry;
use crate::state::AppState;

/// What every backend normalises its own incoming-call shape into before
/// handing off to the registry.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub caller: String,
    pub callee: String,
    pub external_id: String,
    pub metadata: HashMap<String, Value>,
}

/// Creates a handler for `incoming`, registers it, moves it `Idle` ->
/// `Ringing` and returns the handler so the caller can decide when (or
/// whether) to answer. Agent-originated outbound calls skip straight to
/// `answer()` instead of going through this path.
pub fn accept_incoming_call(state: &AppState, incoming: IncomingCall) -> Result<Arc<CallHandler>, ServerError> {
    let internal_id = CallRegistry::mint_id();
    let handler = Arc::new(
        CallHandler::new(
            internal_id.clone(),
            incoming.caller.clone(),
            incoming.callee.clone(),
            state.engine.clone(),
        )
        .with_persistence(state.persistence.clone()),
    );
    handler.accept()?;
    state.calls.insert(internal_id.clone(), &incoming.external_id, handler.clone());

    info!(
        internal_call_id = %internal_id,
        external_id = %incoming.external_id,
        caller = %incoming.caller,
        "accepted incoming call"
    );

    Ok(handler)
}

/// Looks a call up by the backend's own id and drives it to `Ended`,
/// removing it from the registry (§4.6 "On hangup from the backend, it
/// looks up and forwards HANGUP to C5").
pub async fn hangup_by_external_id(state: &AppState, external_id: &str) -> Result<(), ServerError> {
    let handler = state
        .calls
        .remove_by_external_id(external_id)
        .ok_or_else(|| ServerError::UnknownCall(external_id.to_string()))?;
    handler.on_hangup().await?;
    info!(external_id = %external_id, "call hung up");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phone_agent_core::CallState;

    fn incoming(external_id: &str) -> IncomingCall {
        IncomingCall {
            caller: "+49123".to_string(),
            callee: "+49456".to_string(),
            external_id: external_id.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// `Settings::default()` defaults to cloud providers, which require API
    /// keys; the local backends need only an HTTP client, so tests use them.
    fn local_test_settings() -> phone_agent_config::Settings {
        let mut settings = phone_agent_config::Settings::default();
        settings.providers.mode = phone_agent_config::ProviderMode::Local;
        settings
    }

    #[test]
    fn accept_registers_and_rings() {
        let state = AppState::new(local_test_settings()).unwrap();
        let handler = accept_incoming_call(&state, incoming("ext-1")).unwrap();
        assert_eq!(handler.state(), CallState::Ringing);
        assert_eq!(state.calls.len(), 1);
    }

    #[tokio::test]
    async fn hangup_removes_from_registry() {
        let state = AppState::new(local_test_settings()).unwrap();
        accept_incoming_call(&state, incoming("ext-1")).unwrap();
        hangup_by_external_id(&state, "ext-1").await.unwrap();
        assert!(state.calls.is_empty());
    }

    #[tokio::test]
    async fn hangup_of_unknown_external_id_is_an_error() {
        let state = AppState::new(local_test_settings()).unwrap();
        assert!(hangup_by_external_id(&state, "missing").await.is_err());
    }
}
