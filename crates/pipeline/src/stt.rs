//! Speech-to-text backends (§4.2, §6 provider table).
//!
//! [`CloudSpeechToText`] talks to a Deepgram-shaped REST transcription API.
//! [`LocalSpeechToText`] talks to a local HTTP sidecar process exposing the
//! same kind of `/transcribe` endpoint — the pattern this system's own
//! example history shows for STT models where a native Rust inference path
//! is unreliable: run the reference implementation as its own process and
//! call it over HTTP rather than re-embedding its tensor graph.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Deserialize;

use phone_agent_core::{AudioFrame, Error, Language, Result, SpeechToText, TranscriptionResult};

/// Shared construction parameters for both STT backends.
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub languages: Vec<Language>,
    pub timeout_ms: u64,
    /// How many milliseconds of streamed audio to accumulate before sending
    /// a partial-transcription request (§8 first-byte latency budget).
    pub chunk_window_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "nova-2".to_string(),
            languages: Language::all().to_vec(),
            timeout_ms: phone_agent_config::constants::timeouts::STT_REQUEST_MS,
            chunk_window_ms: 1_000,
        }
    }
}

fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let clamped = (sample * phone_agent_config::constants::audio::PCM16_SCALE)
            .clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&clamped.to_le_bytes());
    }
    bytes
}

/// Buffers frames from a live stream into fixed windows and runs `transcribe`
/// on each window, yielding non-final results until the stream ends.
async fn stream_via_windowed_transcribe<F, Fut>(
    frames: BoxStream<'static, AudioFrame>,
    window_ms: u64,
    transcribe: F,
) -> BoxStream<'static, Result<TranscriptionResult>>
where
    F: Fn(Vec<f32>, u32) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<TranscriptionResult>> + Send,
{
    Box::pin(async_stream::stream! {
        use futures::StreamExt;
        tokio::pin!(frames);
        let mut buffer: Vec<f32> = Vec::new();
        let mut sample_rate = 16_000u32;
        let mut buffered_ms: u64 = 0;

        while let Some(frame) = frames.next().await {
            sample_rate = frame.sample_rate;
            buffered_ms += (frame.samples.len() as u64 * 1000) / frame.sample_rate.max(1) as u64;
            buffer.extend_from_slice(&frame.samples);

            if buffered_ms >= window_ms {
                let window = std::mem::take(&mut buffer);
                buffered_ms = 0;
                match transcribe(window, sample_rate).await {
                    Ok(mut result) => {
                        result.is_final = false;
                        yield Ok(result);
                    }
                    Err(e) => yield Err(e),
                }
            }
        }

        if !buffer.is_empty() {
            match transcribe(buffer, sample_rate).await {
                Ok(mut result) => {
                    result.is_final = true;
                    yield Ok(result);
                }
                Err(e) => yield Err(e),
            }
        }
    })
}

#[derive(Clone)]
pub struct CloudSpeechToText {
    client: Client,
    config: SttConfig,
}

impl CloudSpeechToText {
    pub fn new(config: SttConfig) -> Result<Self> {
        if config.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Other("cloud stt backend requires an api key".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Other(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| phone_agent_config::constants::endpoints::DEEPGRAM_DEFAULT.clone())
    }

    async fn transcribe_impl(&self, samples: Vec<f32>, sample_rate: u32) -> Result<TranscriptionResult> {
        let api_key = self.config.api_key.clone().unwrap_or_default();
        let response = self
            .client
            .post(format!("{}/listen", self.endpoint()))
            .header("Authorization", format!("Token {api_key}"))
            .header("Content-Type", "audio/l16")
            .query(&[
                ("model", self.config.model.as_str()),
                ("sample_rate", &sample_rate.to_string()),
                ("encoding", "linear16"),
                ("punctuate", "true"),
            ])
            .body(pcm16_bytes(&samples))
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                Error::Provider(format!("deepgram {status}: {body}"))
            } else {
                Error::Other(format!("deepgram {status}: {body}"))
            });
        }

        let parsed: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("invalid deepgram response: {e}")))?;

        let alternative = parsed
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .ok_or_else(|| Error::Provider("deepgram response had no alternatives".to_string()))?;

        Ok(TranscriptionResult {
            text: alternative.transcript,
            language: Language::from_code(&parsed.metadata.detected_language.unwrap_or_default()),
            confidence: alternative.confidence,
            is_final: true,
        })
    }
}

#[async_trait]
impl SpeechToText for CloudSpeechToText {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<TranscriptionResult> {
        self.transcribe_impl(samples.to_vec(), sample_rate).await
    }

    async fn transcribe_stream(
        &self,
        frames: BoxStream<'static, AudioFrame>,
    ) -> Result<BoxStream<'static, Result<TranscriptionResult>>> {
        let this = self.clone();
        let window_ms = self.config.chunk_window_ms;
        Ok(stream_via_windowed_transcribe(frames, window_ms, move |samples, sr| {
            let this = this.clone();
            async move { this.transcribe_impl(samples, sr).await }
        })
        .await)
    }

    fn supported_languages(&self) -> Vec<Language> {
        self.config.languages.clone()
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Local HTTP-sidecar STT backend: talks to a process-isolated reference
/// model server instead of a native Rust rewrite. Mel-spectrogram and
/// tokenizer edge cases are easy to get subtly wrong porting a model by
/// hand, so the sidecar runs the reference implementation directly.
#[derive(Clone)]
pub struct LocalSpeechToText {
    client: Client,
    config: SttConfig,
}

impl LocalSpeechToText {
    pub fn new(config: SttConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Other(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:8090".to_string())
    }

    async fn transcribe_impl(&self, samples: Vec<f32>, sample_rate: u32) -> Result<TranscriptionResult> {
        let response = self
            .client
            .post(format!("{}/transcribe", self.endpoint()))
            .query(&[("sample_rate", sample_rate.to_string()), ("model", self.config.model.clone())])
            .body(pcm16_bytes(&samples))
            .send()
            .await
            .map_err(|e| Error::Provider(format!("stt sidecar unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Provider(format!("stt sidecar returned {status}")));
        }

        let parsed: SidecarSttResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("invalid sidecar response: {e}")))?;

        Ok(TranscriptionResult {
            text: parsed.text,
            language: parsed.language.and_then(|l| Language::from_code(&l)),
            confidence: parsed.confidence.unwrap_or(1.0),
            is_final: true,
        })
    }
}

#[async_trait]
impl SpeechToText for LocalSpeechToText {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<TranscriptionResult> {
        self.transcribe_impl(samples.to_vec(), sample_rate).await
    }

    async fn transcribe_stream(
        &self,
        frames: BoxStream<'static, AudioFrame>,
    ) -> Result<BoxStream<'static, Result<TranscriptionResult>>> {
        let this = self.clone();
        let window_ms = self.config.chunk_window_ms;
        Ok(stream_via_windowed_transcribe(frames, window_ms, move |samples, sr| {
            let this = this.clone();
            async move { this.transcribe_impl(samples, sr).await }
        })
        .await)
    }

    fn supported_languages(&self) -> Vec<Language> {
        self.config.languages.clone()
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
    metadata: DeepgramMetadata,
}

#[derive(Debug, Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    confidence: f32,
}

#[derive(Debug, Deserialize, Default)]
struct DeepgramMetadata {
    #[serde(default)]
    detected_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SidecarSttResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_backend_refuses_construction_without_api_key() {
        let config = SttConfig::default();
        assert!(CloudSpeechToText::new(config).is_err());
    }

    #[test]
    fn cloud_backend_accepts_construction_with_api_key() {
        let config = SttConfig {
            api_key: Some("dg_test".to_string()),
            ..SttConfig::default()
        };
        assert!(CloudSpeechToText::new(config).is_ok());
    }

    #[test]
    fn local_backend_defaults_to_loopback_sidecar() {
        let backend = LocalSpeechToText::new(SttConfig::default()).unwrap();
        assert_eq!(backend.endpoint(), "http://127.0.0.1:8090");
    }

    #[test]
    fn pcm16_bytes_round_trip_preserves_sign() {
        let bytes = pcm16_bytes(&[-1.0, 0.0, 1.0]);
        assert_eq!(bytes.len(), 6);
        let first = i16::from_le_bytes([bytes[0], bytes[1]]);
        assert!(first < 0);
    }
}
