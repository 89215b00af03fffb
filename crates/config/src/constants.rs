//! Centralized, domain-agnostic constants
//!
//! Industry-specific content (triage tables, prompts, scripts) lives outside
//! this workspace entirely — there is no `domain/` config module here.

/// Service endpoints, overridable via env var, falling back to local
/// development defaults.
pub mod endpoints {
    use once_cell::sync::Lazy;

    pub static OLLAMA_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
    });

    pub static DEEPGRAM_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("DEEPGRAM_API_BASE")
            .unwrap_or_else(|_| "https://api.deepgram.com/v1".to_string())
    });

    pub static GROQ_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("GROQ_API_BASE")
            .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string())
    });

    pub static ELEVENLABS_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("ELEVENLABS_API_BASE")
            .unwrap_or_else(|_| "https://api.elevenlabs.io/v1".to_string())
    });
}

/// Default timeouts (milliseconds unless noted).
pub mod timeouts {
    pub const STT_REQUEST_MS: u64 = 10_000;
    pub const LLM_REQUEST_MS: u64 = 8_000;
    pub const TTS_REQUEST_MS: u64 = 10_000;
}

/// Audio processing defaults (§3, §4.3, §6 wire format).
pub mod audio {
    pub const SAMPLE_RATE: u32 = 16_000;
    pub const BRIDGE_FRAME_SAMPLES: usize = 320;
    pub const VAD_ENERGY_FLOOR_DB: f32 = -45.0;
    pub const VAD_THRESHOLD: f32 = 0.5;
    pub const PCM16_NORMALIZE: f32 = 32768.0;
    pub const PCM16_SCALE: f32 = 32767.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_constants_are_sane() {
        assert!(audio::SAMPLE_RATE > 0);
        assert!((0.0..=1.0).contains(&audio::VAD_THRESHOLD));
        assert!(audio::BRIDGE_FRAME_SAMPLES > 0);
    }
}
