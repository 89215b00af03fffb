//! AI provider capability interfaces (§4.2)
//!
//! These traits are the seam between the conversation engine and concrete
//! STT/LLM/TTS/VAD backends. Every backend (local or cloud) implements one
//! of these and is looked up through a factory keyed on the configured mode
//! (`phone-agent-pipeline` / `phone-agent-llm`).

pub mod llm;
pub mod speech;

pub use llm::{FinishReason, GenerationChunk, GenerationResult, LanguageModel, LlmConfig};
pub use speech::{
    AudioProcessor, SpeechToText, TextToSpeech, TranscriptionResult, VadConfig, VadEvent,
    VadState, VoiceActivityDetector,
};
