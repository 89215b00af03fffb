//! Audio frame and utterance types
//!
//! Mono float32 samples in `[-1.0, 1.0]`, the lingua franca between the
//! telephony bridge, the audio pipeline, and every STT/TTS/VAD backend.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A contiguous run of mono audio samples captured from (or destined for) a
/// call's telephony leg.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Set by the VAD pass; `None` until classified.
    pub is_speech: Option<bool>,
    pub rms: f32,
    pub captured_at_ms: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let rms = rms_of(&samples);
        Self {
            samples,
            sample_rate,
            is_speech: None,
            rms,
            captured_at_ms: now_ms(),
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn with_speech_flag(mut self, is_speech: bool) -> Self {
        self.is_speech = Some(is_speech);
        self
    }
}

/// Root-mean-square energy of a sample buffer, used both by the cheap RMS
/// VAD and as a quick silence pre-filter ahead of the neural VAD.
pub fn rms_of(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A contiguous speech segment bounded by VAD transitions. Emitted once per
/// USER turn by the audio pipeline (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub speech_confidence: f32,
}

impl Utterance {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Wire-level audio encodings the telephony bridge and playback loop speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Raw mono float32 samples, explicit sample rate out of band.
    Raw,
    /// RIFF/WAVE container (header parsed, then treated as Raw).
    Wav,
    /// Signed 16-bit little-endian PCM, as used by the audio bridge (§6).
    Pcm16Le,
}
