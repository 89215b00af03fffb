//! Language model backend trait (§4.2 "LLM backend")

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::conversation::Message;
use crate::error::Result;

/// Configuration for a single LLM backend instance (§3 "LLM Config", §6
/// provider config table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout_ms: u64,
    pub stream: bool,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            endpoint: None,
            api_key: None,
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.95,
            timeout_ms: 8_000,
            stream: true,
            max_retries: 3,
        }
    }
}

/// Why generation stopped (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ToolCall,
    Error,
}

/// Full, non-streamed generation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub finish_reason: FinishReason,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// One increment of a streamed generation (§4.4 "streaming", §8 "first-byte
/// latency").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationChunk {
    pub delta: String,
    pub finish_reason: Option<FinishReason>,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult>;

    async fn generate_stream(
        &self,
        messages: &[Message],
    ) -> Result<BoxStream<'static, Result<GenerationChunk>>>;

    fn is_available(&self) -> bool;
    fn model_name(&self) -> &str;

    /// Cheap token estimate (whitespace/grapheme based, not a real
    /// tokenizer) used for history-trimming decisions before a call (§4.4
    /// "history bounding").
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.graphemes(true).count() as f32 / 4.0).ceil() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;
    impl Dummy {
        fn estimate(&self, text: &str) -> u32 {
            (text.graphemes(true).count() as f32 / 4.0).ceil() as u32
        }
    }

    #[test]
    fn token_estimate_scales_with_length() {
        let dummy = Dummy;
        assert!(dummy.estimate("hello world") > 0);
        assert!(dummy.estimate("a much longer sentence than the other one")
            > dummy.estimate("short"));
    }
}
