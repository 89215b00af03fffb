//! Call State Machine (§4.5, C5).
//!
//! Owns the one valid-transition table for `CallState`/`CallEvent` that
//! `phone_agent_core::call` documents as living here. All state is behind a
//! single lock so a call handler can be shared across the audio-frame task
//! and the webhook task without races.

use chrono::Utc;
use parking_lot::Mutex;

use phone_agent_core::{CallContext, CallEvent, CallState, Error, Result, StateTransitionRecord};

/// Consecutive `Timeout` events tolerated in `Listening` before the call is
/// escalated to a human instead of re-prompted again (§4.5 "timeout
/// policy").
const MAX_REPROMPTS: u32 = 1;

struct Inner {
    context: CallContext,
    transitions: Vec<StateTransitionRecord>,
    consecutive_timeouts: u32,
}

pub struct CallFsm {
    inner: Mutex<Inner>,
}

impl CallFsm {
    pub fn new(call_id: impl Into<String>, caller_id: impl Into<String>, callee_id: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                context: CallContext::new(call_id, caller_id, callee_id),
                transitions: Vec::new(),
                consecutive_timeouts: 0,
            }),
        }
    }

    pub fn state(&self) -> CallState {
        self.inner.lock().context.state
    }

    pub fn context(&self) -> CallContext {
        self.inner.lock().context.clone()
    }

    pub fn transitions(&self) -> Vec<StateTransitionRecord> {
        self.inner.lock().transitions.clone()
    }

    /// Applies one event, returning the new state or an `InvalidTransition`
    /// error if `event` is not valid from the current state.
    pub fn apply(&self, event: CallEvent) -> Result<CallState> {
        let mut guard = self.inner.lock();
        let from = guard.context.state;

        let to = Self::target_state(from, &event, guard.consecutive_timeouts).ok_or_else(|| {
            Error::InvalidTransition {
                from: format!("{from:?}"),
                event: event.name().to_string(),
            }
        })?;

        match &event {
            CallEvent::SpeechDetected => guard.consecutive_timeouts = 0,
            CallEvent::Timeout if from == CallState::Listening => {
                guard.consecutive_timeouts += 1;
            }
            _ => guard.consecutive_timeouts = 0,
        }

        match &event {
            CallEvent::TransferRequested { target } => {
                guard.context.transfer_target = Some(target.clone());
            }
            CallEvent::Error { reason } => {
                guard.context.error_reason = Some(reason.clone());
            }
            _ => {}
        }

        guard.context.state = to;
        if to == CallState::Ended {
            guard.context.ended_at = Some(Utc::now());
        }

        guard.transitions.push(StateTransitionRecord {
            call_id: guard.context.call_id.clone(),
            from,
            to,
            event: event.name().to_string(),
            timestamp: Utc::now(),
        });

        Ok(to)
    }

    /// The transition table (§4.5). Returns `None` for any `(state, event)`
    /// pair that isn't allowed.
    fn target_state(from: CallState, event: &CallEvent, consecutive_timeouts: u32) -> Option<CallState> {
        use CallEvent::*;
        use CallState::*;

        // A call can be torn down from any non-terminal state.
        if matches!(event, Hangup) && from != Ended {
            return Some(Ended);
        }
        // A transfer can be requested from any non-terminal, non-transferring
        // state (outbound calls and mid-conversation escalation alike).
        if matches!(event, TransferRequested { .. }) && from != Ended && from != Transferring {
            return Some(Transferring);
        }

        match (from, event) {
            (Idle, IncomingCall) => Some(Ringing),
            // Agent-originated calls skip ringing and answer immediately.
            (Idle, CallAnswered) => Some(Greeting),
            (Ringing, CallAnswered) => Some(Greeting),
            (Greeting, GreetingComplete) => Some(Listening),
            (Listening, SpeechDetected) => Some(Listening),
            (Listening, UtteranceComplete) => Some(Processing),
            (Processing, ResponseReady) => Some(Speaking),
            (Speaking, PlaybackComplete) => Some(Listening),
            (Listening, Timeout) if consecutive_timeouts < MAX_REPROMPTS => Some(Speaking),
            (Listening, Timeout) => Some(Transferring),
            (Processing, Timeout) => Some(Transferring),
            (Transferring, TransferComplete) => Some(Ended),
            // A recoverable backend error gets an apology-and-continue turn
            // instead of ending the call outright.
            (Processing, Error { .. }) => Some(Speaking),
            (Transferring, Error { .. }) => Some(Speaking),
            (from, Error { .. }) if from != Ended => Some(Ended),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_through_one_turn() {
        let fsm = CallFsm::new("call-1", "+49123", "+49456");
        assert_eq!(fsm.apply(CallEvent::IncomingCall).unwrap(), CallState::Ringing);
        assert_eq!(fsm.apply(CallEvent::CallAnswered).unwrap(), CallState::Greeting);
        assert_eq!(fsm.apply(CallEvent::GreetingComplete).unwrap(), CallState::Listening);
        assert_eq!(fsm.apply(CallEvent::UtteranceComplete).unwrap(), CallState::Processing);
        assert_eq!(fsm.apply(CallEvent::ResponseReady).unwrap(), CallState::Speaking);
        assert_eq!(fsm.apply(CallEvent::PlaybackComplete).unwrap(), CallState::Listening);
    }

    #[test]
    fn invalid_event_is_rejected() {
        let fsm = CallFsm::new("call-1", "+49123", "+49456");
        assert!(fsm.apply(CallEvent::UtteranceComplete).is_err());
        assert_eq!(fsm.state(), CallState::Idle);
    }

    #[test]
    fn repeated_timeout_escalates_to_transfer() {
        let fsm = CallFsm::new("call-1", "+49123", "+49456");
        fsm.apply(CallEvent::IncomingCall).unwrap();
        fsm.apply(CallEvent::CallAnswered).unwrap();
        fsm.apply(CallEvent::GreetingComplete).unwrap();
        assert_eq!(fsm.apply(CallEvent::Timeout).unwrap(), CallState::Speaking);
        fsm.apply(CallEvent::PlaybackComplete).unwrap();
        assert_eq!(fsm.apply(CallEvent::Timeout).unwrap(), CallState::Transferring);
    }

    #[test]
    fn speech_detected_resets_timeout_count() {
        let fsm = CallFsm::new("call-1", "+49123", "+49456");
        fsm.apply(CallEvent::IncomingCall).unwrap();
        fsm.apply(CallEvent::CallAnswered).unwrap();
        fsm.apply(CallEvent::GreetingComplete).unwrap();
        fsm.apply(CallEvent::Timeout).unwrap();
        fsm.apply(CallEvent::PlaybackComplete).unwrap();
        fsm.apply(CallEvent::SpeechDetected).unwrap();
        assert_eq!(fsm.apply(CallEvent::Timeout).unwrap(), CallState::Speaking);
    }

    #[test]
    fn hangup_ends_call_from_any_state() {
        let fsm = CallFsm::new("call-1", "+49123", "+49456");
        fsm.apply(CallEvent::IncomingCall).unwrap();
        assert_eq!(fsm.apply(CallEvent::Hangup).unwrap(), CallState::Ended);
        assert!(fsm.context().ended_at.is_some());
    }

    #[test]
    fn error_during_processing_or_transferring_recovers_to_speaking() {
        let fsm = CallFsm::new("call-1", "+49123", "+49456");
        fsm.apply(CallEvent::IncomingCall).unwrap();
        fsm.apply(CallEvent::CallAnswered).unwrap();
        fsm.apply(CallEvent::GreetingComplete).unwrap();
        fsm.apply(CallEvent::UtteranceComplete).unwrap();
        assert_eq!(
            fsm.apply(CallEvent::Error { reason: "stt timeout".to_string() }).unwrap(),
            CallState::Speaking
        );
        assert_eq!(fsm.context().error_reason.as_deref(), Some("stt timeout"));

        fsm.apply(CallEvent::PlaybackComplete).unwrap();
        fsm.apply(CallEvent::UtteranceComplete).unwrap();
        fsm.apply(CallEvent::TransferRequested { target: "+49999".to_string() }).unwrap();
        assert_eq!(
            fsm.apply(CallEvent::Error { reason: "transfer leg failed".to_string() }).unwrap(),
            CallState::Speaking
        );
    }

    #[test]
    fn error_from_other_states_ends_the_call() {
        let fsm = CallFsm::new("call-1", "+49123", "+49456");
        fsm.apply(CallEvent::IncomingCall).unwrap();
        assert_eq!(
            fsm.apply(CallEvent::Error { reason: "ringing aborted".to_string() }).unwrap(),
            CallState::Ended
        );
    }

    #[test]
    fn transfer_then_complete_ends_call() {
        let fsm = CallFsm::new("call-1", "+49123", "+49456");
        fsm.apply(CallEvent::IncomingCall).unwrap();
        fsm.apply(CallEvent::CallAnswered).unwrap();
        fsm.apply(CallEvent::GreetingComplete).unwrap();
        fsm.apply(CallEvent::TransferRequested { target: "+49999".to_string() })
            .unwrap();
        assert_eq!(fsm.context().transfer_target.as_deref(), Some("+49999"));
        assert_eq!(fsm.apply(CallEvent::TransferComplete).unwrap(), CallState::Ended);
    }
}
