//! Speech-to-text, text-to-speech and voice activity detection traits
//! (§4.2, §4.3)

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;
use crate::error::Result;
use crate::language::Language;

/// Outcome of one transcription pass (§3 "Transcription Result").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: Option<Language>,
    pub confidence: f32,
    pub is_final: bool,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a complete utterance (§4.2 "batch transcription").
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<TranscriptionResult>;

    /// Transcribe a live audio stream, yielding partial and final results as
    /// they become available (§4.2 "streaming transcription", §8
    /// "first-byte latency").
    async fn transcribe_stream(
        &self,
        frames: BoxStream<'static, AudioFrame>,
    ) -> Result<BoxStream<'static, Result<TranscriptionResult>>>;

    fn supported_languages(&self) -> Vec<Language>;
    fn model_name(&self) -> &str;

    fn supports_language(&self, language: Language) -> bool {
        self.supported_languages().contains(&language)
    }
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize the entire text and return the complete sample buffer.
    async fn synthesize(&self, text: &str, voice: &str, language: Language) -> Result<Vec<f32>>;

    /// Synthesize incrementally, yielding sample chunks as soon as they are
    /// ready so playback can begin before the whole utterance is rendered
    /// (§4.3 "streaming synthesis", §8 "first-byte latency").
    async fn synthesize_stream(
        &self,
        text: &str,
        voice: &str,
        language: Language,
    ) -> Result<BoxStream<'static, Result<Vec<f32>>>>;

    fn available_voices(&self, language: Language) -> Vec<String>;
    fn model_name(&self) -> &str;
    fn default_voice(&self, language: Language) -> String {
        self.available_voices(language)
            .into_iter()
            .next()
            .unwrap_or_else(|| "default".to_string())
    }
}

/// Voice activity detector tuning (§3 "VAD Config"). `sensitive()` favours
/// recall (fewer missed speech starts) at the cost of more false triggers;
/// `strict()` favours precision for noisy telephony lines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VadConfig {
    pub threshold: f32,
    pub min_speech_duration_ms: u32,
    pub min_silence_duration_ms: u32,
    pub energy_floor_db: f32,
    pub pre_speech_padding_ms: u32,
    pub post_speech_padding_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_speech_duration_ms: 100,
            min_silence_duration_ms: 500,
            energy_floor_db: -45.0,
            pre_speech_padding_ms: 200,
            post_speech_padding_ms: 200,
        }
    }
}

impl VadConfig {
    pub fn sensitive() -> Self {
        Self {
            threshold: 0.35,
            min_speech_duration_ms: 80,
            min_silence_duration_ms: 400,
            energy_floor_db: -50.0,
            ..Self::default()
        }
    }

    pub fn strict() -> Self {
        Self {
            threshold: 0.65,
            min_speech_duration_ms: 150,
            min_silence_duration_ms: 700,
            energy_floor_db: -35.0,
            ..Self::default()
        }
    }
}

/// Frame-level VAD verdicts emitted by the detector (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VadEvent {
    SpeechStart,
    SpeechContinue { probability: f32 },
    SpeechEnd,
    Silence,
}

impl VadEvent {
    pub fn is_speech(&self) -> bool {
        matches!(self, Self::SpeechStart | Self::SpeechContinue { .. })
    }

    pub fn probability(&self) -> f32 {
        match self {
            Self::SpeechContinue { probability } => *probability,
            Self::SpeechStart => 1.0,
            Self::SpeechEnd | Self::Silence => 0.0,
        }
    }
}

/// Internal debounce state machine a VAD implementation drives (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VadState {
    Idle,
    PendingSpeech,
    InSpeech,
    PendingSilence,
}

#[async_trait]
pub trait VoiceActivityDetector: Send + Sync {
    /// Classify a single frame, applying the debounce rules in `VadConfig`.
    async fn detect(&self, frame: &AudioFrame) -> Result<VadEvent>;

    fn speech_probability(&self, frame: &AudioFrame) -> f32;

    /// Classify an entire stream, applying padding and debounce, yielding
    /// one `VadEvent` per input frame.
    async fn process_stream(
        &self,
        frames: BoxStream<'static, AudioFrame>,
    ) -> Result<BoxStream<'static, Result<VadEvent>>>;

    fn reset(&self);
    fn current_state(&self) -> VadState;
    fn model_info(&self) -> &str;
    fn is_neural(&self) -> bool;

    /// Frame size (in samples) this detector performs best with; callers
    /// should chunk audio accordingly where feasible.
    fn recommended_frame_size(&self) -> usize {
        512
    }
}

/// Audio pre-processing stage (AEC/NS/AGC). No implementation ships in this
/// crate; the trait exists so the pipeline's processing chain has a seam to
/// plug one in later (§4.3 "processing chain", marked not-yet-implemented).
pub trait AudioProcessor: Send + Sync {
    fn process(&self, frame: AudioFrame) -> Result<AudioFrame>;
    fn name(&self) -> &str;
    fn reset(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vad_event_speech_classification() {
        assert!(VadEvent::SpeechStart.is_speech());
        assert!(VadEvent::SpeechContinue { probability: 0.8 }.is_speech());
        assert!(!VadEvent::SpeechEnd.is_speech());
        assert!(!VadEvent::Silence.is_speech());
    }

    #[test]
    fn vad_config_presets_order_correctly() {
        let sensitive = VadConfig::sensitive();
        let strict = VadConfig::strict();
        assert!(sensitive.threshold < strict.threshold);
        assert!(sensitive.min_silence_duration_ms < strict.min_silence_duration_ms);
    }
}
