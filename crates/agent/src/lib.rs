//! Call state machine and conversation engine (§4.4 C4, §4.5 C5).
//!
//! This crate owns the one per-call stateful loop: `call_fsm` tracks which
//! `CallState` a call is in and which events are valid from it;
//! `conversation_engine` runs the transcribe → detect → triage → generate →
//! synthesize cycle for each turn while that call is `Listening`/`Speaking`.
//! Neither module knows how audio reaches the process or how a call was
//! dialed — that's `phone-agent-server`.

pub mod call_fsm;
pub mod conversation_engine;

pub use call_fsm::CallFsm;
pub use conversation_engine::{ConversationEngine, EngineEvent, TurnOutput};
