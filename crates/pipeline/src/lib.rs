//! Audio pipeline: voice activity detection, speech-to-text, text-to-speech,
//! and the provider factory that wires concrete backends to call
//! configuration (§4.3 "Audio Pipeline").

pub mod factory;
pub mod stt;
pub mod tts;
pub mod vad;

pub use factory::{build_stt, build_tts, build_vad};
pub use stt::{CloudSpeechToText, LocalSpeechToText};
pub use tts::{CachingTextToSpeech, CloudTextToSpeech, LocalTextToSpeech};
pub use vad::SimpleVad;

#[cfg(feature = "neural")]
pub use vad::NeuralVad;
