//! Builds VAD/STT/TTS backends from provider configuration (§6), mirroring
//! `phone_agent_llm::factory`'s provider-switch + hybrid-fallback pattern.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use phone_agent_config::{ProviderConfig, ProviderMode, VadBackend, VadProviderConfig};
use phone_agent_core::{
    Error, Language, Result, SpeechToText, TextToSpeech, TranscriptionResult, VadConfig, VadState,
    VoiceActivityDetector,
};

use crate::stt::{CloudSpeechToText, LocalSpeechToText, SttConfig};
use crate::tts::{CachingTextToSpeech, CloudTextToSpeech, LocalTextToSpeech, TtsConfig};
use crate::vad::SimpleVad;

#[cfg(feature = "neural")]
use crate::vad::NeuralVad;

/// Builds the voice activity detector named by `config.backend`. Falls back
/// to [`SimpleVad`] when `neural` is requested but the feature isn't
/// compiled in, or when loading the ONNX model fails — VAD sits ahead of
/// every other pipeline stage, so it must never be the reason a call can't
/// proceed.
pub fn build_vad(config: &VadProviderConfig) -> Arc<dyn VoiceActivityDetector> {
    let vad_config = VadConfig {
        threshold: config.threshold,
        ..VadConfig::default()
    };

    match config.backend {
        VadBackend::Simple => Arc::new(SimpleVad::new(vad_config)),
        VadBackend::Neural => {
            #[cfg(feature = "neural")]
            {
                match NeuralVad::load("models/silero_vad.onnx", vad_config.clone(), 16_000) {
                    Ok(vad) => return Arc::new(vad),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to load neural vad model, falling back to energy vad");
                    }
                }
            }
            Arc::new(SimpleVad::new(vad_config))
        }
    }
}

fn stt_config_from_role(role: &phone_agent_config::RoleProviderConfig) -> SttConfig {
    SttConfig {
        endpoint: None,
        api_key: role.api_key.clone(),
        model: role.model.clone().unwrap_or_else(|| "nova-2".to_string()),
        languages: Language::all().to_vec(),
        timeout_ms: phone_agent_config::constants::timeouts::STT_REQUEST_MS,
        chunk_window_ms: 1_000,
    }
}

fn tts_config_from_role(role: &phone_agent_config::RoleProviderConfig) -> TtsConfig {
    let mut config = TtsConfig {
        api_key: role.api_key.clone(),
        ..TtsConfig::default()
    };
    config.endpoint = None;
    config
}

/// Builds the speech-to-text backend the conversation engine should use,
/// honoring `providers.mode` and falling back to the local sidecar on
/// transient cloud failures when `fallback_to_local` is set.
pub fn build_stt(config: &ProviderConfig) -> Result<Arc<dyn SpeechToText>> {
    match config.mode {
        ProviderMode::Local => Ok(Arc::new(LocalSpeechToText::new(stt_config_from_role(&config.stt))?)),
        ProviderMode::Cloud => Ok(Arc::new(CloudSpeechToText::new(stt_config_from_role(&config.stt))?)),
        ProviderMode::Hybrid => {
            let primary = Arc::new(CloudSpeechToText::new(stt_config_from_role(&config.stt))?);
            if config.fallback_to_local {
                let fallback = Arc::new(LocalSpeechToText::new(stt_config_from_role(&config.stt))?);
                Ok(Arc::new(HybridStt { primary, fallback }))
            } else {
                Ok(primary)
            }
        }
    }
}

/// Builds the text-to-speech backend, wrapped in a bounded cache sized by
/// `PipelineConfig::voice_cache_size`.
pub fn build_tts(config: &ProviderConfig, voice_cache_size: usize) -> Result<Arc<dyn TextToSpeech>> {
    let backend: Arc<dyn TextToSpeech> = match config.mode {
        ProviderMode::Local => Arc::new(LocalTextToSpeech::new(tts_config_from_role(&config.tts))?),
        ProviderMode::Cloud => Arc::new(CloudTextToSpeech::new(tts_config_from_role(&config.tts))?),
        ProviderMode::Hybrid => {
            let primary = Arc::new(CloudTextToSpeech::new(tts_config_from_role(&config.tts))?);
            if config.fallback_to_local {
                let fallback = Arc::new(LocalTextToSpeech::new(tts_config_from_role(&config.tts))?);
                Arc::new(HybridTts { primary, fallback })
            } else {
                primary
            }
        }
    };
    Ok(Arc::new(CachingTextToSpeech::new(ArcTts(backend), voice_cache_size)))
}

/// `TextToSpeech` is object-safe but `CachingTextToSpeech<T>` wants an owned
/// `T`; this newtype lets the cache wrap an `Arc<dyn TextToSpeech>` as if it
/// were a concrete backend.
struct ArcTts(Arc<dyn TextToSpeech>);

#[async_trait]
impl TextToSpeech for ArcTts {
    async fn synthesize(&self, text: &str, voice: &str, language: Language) -> Result<Vec<f32>> {
        self.0.synthesize(text, voice, language).await
    }

    async fn synthesize_stream(
        &self,
        text: &str,
        voice: &str,
        language: Language,
    ) -> Result<BoxStream<'static, Result<Vec<f32>>>> {
        self.0.synthesize_stream(text, voice, language).await
    }

    fn available_voices(&self, language: Language) -> Vec<String> {
        self.0.available_voices(language)
    }

    fn model_name(&self) -> &str {
        self.0.model_name()
    }
}

struct HybridStt {
    primary: Arc<dyn SpeechToText>,
    fallback: Arc<dyn SpeechToText>,
}

#[async_trait]
impl SpeechToText for HybridStt {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<TranscriptionResult> {
        match self.primary.transcribe(samples, sample_rate).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "primary stt failed, falling back to local");
                self.fallback.transcribe(samples, sample_rate).await
            }
            Err(err) => Err(err),
        }
    }

    async fn transcribe_stream(
        &self,
        frames: BoxStream<'static, phone_agent_core::AudioFrame>,
    ) -> Result<BoxStream<'static, Result<TranscriptionResult>>> {
        match self.primary.transcribe_stream(frames).await {
            Ok(stream) => Ok(stream),
            Err(err) if err.is_transient() => {
                Err(Error::Provider(format!(
                    "primary stt stream failed and the audio frames were already consumed: {err}"
                )))
            }
            Err(err) => Err(err),
        }
    }

    fn supported_languages(&self) -> Vec<Language> {
        self.primary.supported_languages()
    }

    fn model_name(&self) -> &str {
        self.primary.model_name()
    }
}

struct HybridTts {
    primary: Arc<dyn TextToSpeech>,
    fallback: Arc<dyn TextToSpeech>,
}

#[async_trait]
impl TextToSpeech for HybridTts {
    async fn synthesize(&self, text: &str, voice: &str, language: Language) -> Result<Vec<f32>> {
        match self.primary.synthesize(text, voice, language).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "primary tts failed, falling back to local");
                self.fallback.synthesize(text, voice, language).await
            }
            Err(err) => Err(err),
        }
    }

    async fn synthesize_stream(
        &self,
        text: &str,
        voice: &str,
        language: Language,
    ) -> Result<BoxStream<'static, Result<Vec<f32>>>> {
        match self.primary.synthesize_stream(text, voice, language).await {
            Ok(stream) => Ok(stream),
            Err(err) if err.is_transient() => self.fallback.synthesize_stream(text, voice, language).await,
            Err(err) => Err(err),
        }
    }

    fn available_voices(&self, language: Language) -> Vec<String> {
        self.primary.available_voices(language)
    }

    fn model_name(&self) -> &str {
        self.primary.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_backend_builds_without_a_model_file() {
        let vad = build_vad(&VadProviderConfig {
            backend: VadBackend::Simple,
            threshold: 0.5,
        });
        assert_eq!(vad.current_state(), VadState::Idle);
        assert!(!vad.is_neural());
    }

    #[test]
    fn neural_backend_falls_back_when_model_is_missing() {
        let vad = build_vad(&VadProviderConfig {
            backend: VadBackend::Neural,
            threshold: 0.5,
        });
        // No model file ships in this workspace, so this always exercises
        // the fallback path regardless of whether `neural` is compiled in.
        assert_eq!(vad.model_info(), "energy-rms");
    }

    #[test]
    fn local_stt_mode_builds() {
        let config = ProviderConfig {
            mode: ProviderMode::Local,
            ..Default::default()
        };
        assert!(build_stt(&config).is_ok());
    }

    #[test]
    fn cloud_stt_mode_without_api_key_fails() {
        let config = ProviderConfig {
            mode: ProviderMode::Cloud,
            ..Default::default()
        };
        assert!(build_stt(&config).is_err());
    }

    #[test]
    fn local_tts_mode_builds_with_cache() {
        let config = ProviderConfig {
            mode: ProviderMode::Local,
            ..Default::default()
        };
        assert!(build_tts(&config, 2).is_ok());
    }
}
