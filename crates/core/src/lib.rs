//! Core data model, capability traits, resilience primitives and tenant
//! resolution shared by every phone-agent crate.
//!
//! Nothing in this crate knows how to place a call, run an inference
//! backend, or talk to a database — it only defines the vocabulary
//! (`CallContext`, `ConversationState`, `Turn`, ...), the resilience
//! primitives every external call goes through (`retry`, circuit breakers),
//! and the trait seams (`traits::*`, `policy::*`) that the other crates
//! implement against.

pub mod audio;
pub mod call;
pub mod conversation;
pub mod error;
pub mod language;
pub mod metrics;
pub mod policy;
pub mod retry;
pub mod tenant;
pub mod traits;

pub use audio::{AudioEncoding, AudioFrame, Utterance};
pub use call::{CallContext, CallEvent, CallState, StateTransitionRecord};
pub use conversation::{ConversationState, Message, Turn, TurnAnnotations, TurnRole};
pub use error::{Error, Result};
pub use language::{Dialect, DialectDetection, Language, LanguageDetection};
pub use metrics::{latency_metrics, ComponentSnapshot, LatencyMetrics, TurnTiming};
pub use policy::{
    apology_text, Action, AlwaysConsent, ConsentGate, IntentDetector, NullPromptProvider,
    NullTriagePolicy, SystemPromptProvider, TriagePolicy, TriageResult, Urgency,
};
pub use retry::{breaker_registry, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use tenant::{TenantContext, TenantDirectory, TenantResolution, TenantResolutionMethod, TenantResolver, TenantSignals};
pub use traits::{
    AudioProcessor, FinishReason, GenerationChunk, GenerationResult, LanguageModel, LlmConfig,
    SpeechToText, TextToSpeech, TranscriptionResult, VadConfig, VadEvent, VadState,
    VoiceActivityDetector,
};
