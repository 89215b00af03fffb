//! Call Context and the call lifecycle vocabulary (§3, §4.5)
//!
//! The transition table itself (which (state, event) pairs are valid, and
//! the observer/lock discipline around it) is implemented by
//! `phone-agent-agent::call_fsm`; this module only carries the shared data
//! types so that core, agent and server can all speak about a call without a
//! cyclic dependency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// States in the call state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Ringing,
    Greeting,
    Listening,
    Processing,
    Speaking,
    Transferring,
    Ended,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

/// Events that drive call state transitions (§4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    IncomingCall,
    CallAnswered,
    GreetingComplete,
    SpeechDetected,
    UtteranceComplete,
    ResponseReady,
    PlaybackComplete,
    TransferRequested { target: String },
    TransferComplete,
    Hangup,
    Error { reason: String },
    Timeout,
}

impl CallEvent {
    /// Stable discriminant name, used for transition-table lookups and logs
    /// without exposing event payloads.
    pub fn name(&self) -> &'static str {
        match self {
            Self::IncomingCall => "incoming_call",
            Self::CallAnswered => "call_answered",
            Self::GreetingComplete => "greeting_complete",
            Self::SpeechDetected => "speech_detected",
            Self::UtteranceComplete => "utterance_complete",
            Self::ResponseReady => "response_ready",
            Self::PlaybackComplete => "playback_complete",
            Self::TransferRequested { .. } => "transfer_requested",
            Self::TransferComplete => "transfer_complete",
            Self::Hangup => "hangup",
            Self::Error { .. } => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// One per active call (§3 "Call Context"). Owned exclusively by its Call
/// State Machine handler; mutated only under that handler's mutex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContext {
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Conversation id this call's engine session is keyed by.
    pub conversation_id: Option<uuid::Uuid>,
    pub transfer_target: Option<String>,
    pub error_reason: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl CallContext {
    pub fn new(call_id: impl Into<String>, caller_id: impl Into<String>, callee_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            caller_id: caller_id.into(),
            callee_id: callee_id.into(),
            state: CallState::Idle,
            started_at: Utc::now(),
            ended_at: None,
            conversation_id: None,
            transfer_target: None,
            error_reason: None,
            metadata: HashMap::new(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        end - self.started_at
    }
}

/// A single recorded (from, event, to) transition, for audit persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    pub call_id: String,
    pub from: CallState,
    pub to: CallState,
    pub event: String,
    pub timestamp: DateTime<Utc>,
}
