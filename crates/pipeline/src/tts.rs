//! Text-to-speech backends (§4.3, §6 provider table) plus a bounded voice
//! cache decorator (`PipelineConfig::voice_cache_size`).

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use phone_agent_core::{Error, Language, Result, TextToSpeech};

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub voices: HashMap<String, Vec<String>>,
    pub timeout_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        let mut voices = HashMap::new();
        voices.insert("de".to_string(), vec!["de-standard-1".to_string()]);
        voices.insert("ru".to_string(), vec!["ru-standard-1".to_string()]);
        voices.insert("tr".to_string(), vec!["tr-standard-1".to_string()]);
        voices.insert("en".to_string(), vec!["en-standard-1".to_string()]);
        Self {
            endpoint: None,
            api_key: None,
            voices,
            timeout_ms: phone_agent_config::constants::timeouts::TTS_REQUEST_MS,
        }
    }
}

fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / phone_agent_config::constants::audio::PCM16_NORMALIZE)
        .collect()
}

/// ElevenLabs-shaped cloud TTS: requests raw PCM output directly so no audio
/// container needs decoding.
#[derive(Clone)]
pub struct CloudTextToSpeech {
    client: Client,
    config: TtsConfig,
}

impl CloudTextToSpeech {
    pub fn new(config: TtsConfig) -> Result<Self> {
        if config.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Other("cloud tts backend requires an api key".to_string()));
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
            .unwrap_or_else(|| phone_agent_config::constants::endpoints::ELEVENLABS_DEFAULT.clone())
    }

    async fn synthesize_impl(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let api_key = self.config.api_key.clone().unwrap_or_default();
        let response = self
            .client
            .post(format!("{}/text-to-speech/{voice}", self.endpoint()))
            .query(&[("output_format", "pcm_16000")])
            .header("xi-api-key", api_key)
            .json(&ElevenLabsRequest {
                text: text.to_string(),
                model_id: "eleven_multilingual_v2".to_string(),
            })
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                Error::Provider(format!("elevenlabs {status}: {body}"))
            } else {
                Error::Other(format!("elevenlabs {status}: {body}"))
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Provider(e.to_string()))
    }
}

#[async_trait]
impl TextToSpeech for CloudTextToSpeech {
    async fn synthesize(&self, text: &str, voice: &str, _language: Language) -> Result<Vec<f32>> {
        let bytes = self.synthesize_impl(text, voice).await?;
        Ok(pcm16le_to_f32(&bytes))
    }

    async fn synthesize_stream(
        &self,
        text: &str,
        voice: &str,
        _language: Language,
    ) -> Result<BoxStream<'static, Result<Vec<f32>>>> {
        let bytes = self.synthesize_impl(text, voice).await?;
        let samples = pcm16le_to_f32(&bytes);
        // ElevenLabs streams PCM progressively in production; here the
        // complete buffer is re-chunked so callers downstream still see an
        // incremental stream rather than one large blocking write.
        Ok(Box::pin(async_stream::stream! {
            for chunk in samples.chunks(1_600) {
                yield Ok(chunk.to_vec());
            }
        }))
    }

    fn available_voices(&self, language: Language) -> Vec<String> {
        self.config
            .voices
            .get(language.code())
            .cloned()
            .unwrap_or_default()
    }

    fn model_name(&self) -> &str {
        "elevenlabs-multilingual-v2"
    }
}

/// Local HTTP-sidecar TTS backend, mirroring the STT sidecar pattern: a
/// locally-hosted synthesis service returns a WAV payload.
#[derive(Clone)]
pub struct LocalTextToSpeech {
    client: Client,
    config: TtsConfig,
}

impl LocalTextToSpeech {
    pub fn new(config: TtsConfig) -> Result<Self> {
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
            .unwrap_or_else(|| "http://127.0.0.1:8091".to_string())
    }

    async fn synthesize_impl(&self, text: &str, voice: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/synthesize", self.endpoint()))
            .json(&SidecarTtsRequest {
                text: text.to_string(),
                voice: voice.to_string(),
            })
            .send()
            .await
            .map_err(|e| Error::Provider(format!("tts sidecar unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Provider(format!("tts sidecar returned {status}")));
        }

        let body = response.bytes().await.map_err(|e| Error::Provider(e.to_string()))?;
        let mut reader = hound::WavReader::new(std::io::Cursor::new(body.as_ref()))
            .map_err(|e| Error::Provider(format!("invalid wav from tts sidecar: {e}")))?;
        let samples: Vec<f32> = reader
            .samples::<i16>()
            .filter_map(|s| s.ok())
            .map(|s| s as f32 / phone_agent_config::constants::audio::PCM16_NORMALIZE)
            .collect();
        Ok(samples)
    }
}

#[async_trait]
impl TextToSpeech for LocalTextToSpeech {
    async fn synthesize(&self, text: &str, voice: &str, _language: Language) -> Result<Vec<f32>> {
        self.synthesize_impl(text, voice).await
    }

    async fn synthesize_stream(
        &self,
        text: &str,
        voice: &str,
        _language: Language,
    ) -> Result<BoxStream<'static, Result<Vec<f32>>>> {
        let samples = self.synthesize_impl(text, voice).await?;
        Ok(Box::pin(async_stream::stream! {
            for chunk in samples.chunks(1_600) {
                yield Ok(chunk.to_vec());
            }
        }))
    }

    fn available_voices(&self, language: Language) -> Vec<String> {
        self.config
            .voices
            .get(language.code())
            .cloned()
            .unwrap_or_default()
    }

    fn model_name(&self) -> &str {
        "local-tts-sidecar"
    }
}

/// Caches complete `synthesize()` results keyed by `(voice, text)`, bounded
/// to the configured number of entries. Canned phrases (greetings, transfer
/// announcements) repeat often enough across calls that this avoids
/// resynthesizing them; streaming synthesis bypasses the cache since its
/// value is the first audio byte arriving quickly, not the whole buffer.
pub struct CachingTextToSpeech<T: TextToSpeech> {
    inner: T,
    capacity: usize,
    cache: Mutex<LruCache>,
}

struct LruCache {
    order: VecDeque<(String, String)>,
    entries: HashMap<(String, String), Vec<f32>>,
}

impl LruCache {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &(String, String)) -> Option<Vec<f32>> {
        if let Some(samples) = self.entries.get(key).cloned() {
            self.order.retain(|k| k != key);
            self.order.push_back(key.clone());
            Some(samples)
        } else {
            None
        }
    }

    fn insert(&mut self, key: (String, String), samples: Vec<f32>, capacity: usize) {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.entries.len() >= capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, samples);
    }
}

impl<T: TextToSpeech> CachingTextToSpeech<T> {
    pub fn new(inner: T, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            cache: Mutex::new(LruCache::new()),
        }
    }
}

#[async_trait]
impl<T: TextToSpeech> TextToSpeech for CachingTextToSpeech<T> {
    async fn synthesize(&self, text: &str, voice: &str, language: Language) -> Result<Vec<f32>> {
        let key = (voice.to_string(), text.to_string());
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(cached);
        }
        let samples = self.inner.synthesize(text, voice, language).await?;
        self.cache.lock().insert(key, samples.clone(), self.capacity);
        Ok(samples)
    }

    async fn synthesize_stream(
        &self,
        text: &str,
        voice: &str,
        language: Language,
    ) -> Result<BoxStream<'static, Result<Vec<f32>>>> {
        self.inner.synthesize_stream(text, voice, language).await
    }

    fn available_voices(&self, language: Language) -> Vec<String> {
        self.inner.available_voices(language)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[derive(Debug, Serialize)]
struct ElevenLabsRequest {
    text: String,
    model_id: String,
}

#[derive(Debug, Serialize)]
struct SidecarTtsRequest {
    text: String,
    voice: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingBackend {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl TextToSpeech for CountingBackend {
        async fn synthesize(&self, _text: &str, _voice: &str, _language: Language) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(vec![0.1, 0.2])
        }

        async fn synthesize_stream(
            &self,
            _text: &str,
            _voice: &str,
            _language: Language,
        ) -> Result<BoxStream<'static, Result<Vec<f32>>>> {
            Ok(Box::pin(futures::stream::empty()))
        }

        fn available_voices(&self, _language: Language) -> Vec<String> {
            vec!["v1".to_string()]
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn repeated_phrase_hits_cache() {
        let cache = CachingTextToSpeech::new(
            CountingBackend {
                calls: std::sync::atomic::AtomicUsize::new(0),
            },
            2,
        );
        cache.synthesize("hallo", "v1", Language::German).await.unwrap();
        cache.synthesize("hallo", "v1", Language::German).await.unwrap();
        assert_eq!(cache.inner.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_evicts_oldest_beyond_capacity() {
        let cache = CachingTextToSpeech::new(
            CountingBackend {
                calls: std::sync::atomic::AtomicUsize::new(0),
            },
            1,
        );
        cache.synthesize("a", "v1", Language::German).await.unwrap();
        cache.synthesize("b", "v1", Language::German).await.unwrap();
        cache.synthesize("a", "v1", Language::German).await.unwrap();
        assert_eq!(cache.inner.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn pcm16le_round_trip_preserves_sign() {
        let bytes = (-1i16).to_le_bytes();
        let samples = pcm16le_to_f32(&bytes);
        assert!(samples[0] < 0.0);
    }
}
