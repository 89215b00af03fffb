//! SIP backend (§4.6: "owns an in-memory registry of active calls keyed by
//! SIP call-id and exposes `answer`, `hangup`, originate-outbound").
//!
//! The registry itself is `AppState::calls` (external id = SIP call-id);
//! this module only adds the three SIP-shaped operations on top of it. The
//! SIP wire protocol (INVITE/200 OK/BYE framing) is out of scope — a
//! deployment's SIP stack calls into this as its own normalisation layer,
//! the same way the softswitch backend normalises event-socket frames.

use std::sync::Arc;

use tracing::info;

use crate::call_handler::CallHandler;
use crate::error::ServerError;
use crate::inbound::{accept_incoming_call, hangup_by_external_id, IncomingCall};
use crate::registry::CallRegistry;
use crate::state::AppState;
use phone_agent_agent::TurnOutput;

pub struct SipBackend {
    state: Arc<AppState>,
}

impl SipBackend {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// A SIP stack delivering an INVITE calls this with its own call-id;
    /// the call is registered and moved `Idle` -> `Ringing`.
    pub fn incoming_call(&self, sip_call_id: &str, caller: &str, callee: &str) -> Result<Arc<CallHandler>, ServerError> {
        accept_incoming_call(
            &self.state,
            IncomingCall {
                caller: caller.to_string(),
                callee: callee.to_string(),
                external_id: sip_call_id.to_string(),
                metadata: Default::default(),
            },
        )
    }

    pub async fn answer(&self, sip_call_id: &str) -> Result<TurnOutput, ServerError> {
        let handler = self
            .state
            .calls
            .get_by_external_id(sip_call_id)?;
        handler.answer().await
    }

    pub async fn hangup(&self, sip_call_id: &str) -> Result<(), ServerError> {
        hangup_by_external_id(&self.state, sip_call_id).await
    }

    /// Places an agent-originated outbound call: no `IncomingCall` event is
    /// needed since `Idle -> Greeting` is a direct transition for calls we
    /// dial ourselves (§4.5 "agent-originated calls skip ringing").
    pub async fn originate(&self, caller: &str, callee: &str) -> Result<(String, TurnOutput), ServerError> {
        let internal_id = CallRegistry::mint_id();
        let handler = Arc::new(
            CallHandler::new(
                internal_id.clone(),
                caller.to_string(),
                callee.to_string(),
                self.state.engine.clone(),
            )
            .with_persistence(self.state.persistence.clone()),
        );
        self.state.calls.insert(internal_id.clone(), &internal_id, handler.clone());
        let output = handler.answer().await?;
        info!(internal_call_id = %internal_id, callee = %callee, "originated outbound call");
        Ok((internal_id, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phone_agent_config::{ProviderMode, Settings};
    use phone_agent_core::CallState;

    fn backend() -> SipBackend {
        let mut settings = Settings::default();
        settings.providers.mode = ProviderMode::Local;
        SipBackend::new(Arc::new(AppState::new(settings).unwrap()))
    }

    #[tokio::test]
    async fn incoming_call_then_answer_reaches_listening() {
        let backend = backend();
        let handler = backend.incoming_call("sip-1", "+49123", "+49456").unwrap();
        assert_eq!(handler.state(), CallState::Ringing);
        backend.answer("sip-1").await.unwrap();
        assert_eq!(handler.state(), CallState::Listening);
    }

    #[tokio::test]
    async fn hangup_removes_the_call() {
        let backend = backend();
        backend.incoming_call("sip-1", "+49123", "+49456").unwrap();
        backend.hangup("sip-1").await.unwrap();
        assert!(backend.answer("sip-1").await.is_err());
    }

    #[tokio::test]
    async fn originate_skips_ringing_straight_to_listening() {
        let backend = backend();
        let (call_id, output) = backend.originate("+49999", "+49123").await.unwrap();
        assert!(!output.text.is_empty());
        let handler = backend.state.calls.get(&call_id).unwrap();
        assert_eq!(handler.state(), CallState::Listening);
    }
}
