//! Cloud LLM backend: Groq's OpenAI-compatible chat completions API (§6
//! provider table, `providers.mode = "cloud"`).

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use phone_agent_core::{
    breaker_registry, CircuitBreakerConfig, Error, FinishReason, GenerationChunk,
    GenerationResult, LanguageModel, LlmConfig, Message, Result, RetryPolicy, TurnRole,
};

use crate::LlmError;

const BREAKER_NAME: &str = "llm.groq";

#[derive(Clone)]
pub struct GroqBackend {
    client: Client,
    config: LlmConfig,
}

impl GroqBackend {
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(LlmError::Configuration("groq backend requires an api key".to_string()).into());
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| phone_agent_config::constants::endpoints::GROQ_DEFAULT.clone())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.config.max_retries.max(1))
    }

    fn request_body(&self, messages: &[Message], stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(ChatMessage::from).collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stream,
        }
    }

    async fn chat(&self, messages: &[Message]) -> Result<ChatResponse> {
        let api_key = self.config.api_key.clone().unwrap_or_default();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint()))
            .bearer_auth(api_key)
            .json(&self.request_body(messages, false))
            .send()
            .await
            .map_err(LlmError::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                LlmError::Network(format!("groq {status}: {body}")).into()
            } else {
                LlmError::Api(format!("groq {status}: {body}")).into()
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()).into())
    }
}

#[async_trait]
impl LanguageModel for GroqBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult> {
        let breaker = breaker_registry().get_or_create(BREAKER_NAME, CircuitBreakerConfig::default());
        let policy = self.retry_policy();
        let this = self.clone();
        let messages = messages.to_vec();

        let response = breaker
            .guard(move || {
                let this = this.clone();
                let messages = messages.clone();
                let policy = policy.clone();
                async move {
                    policy
                        .run(
                            move || {
                                let this = this.clone();
                                let messages = messages.clone();
                                async move { this.chat(&messages).await }
                            },
                            Error::is_transient,
                            |_| false,
                            |_, attempt, delay| {
                                tracing::debug!(attempt, ?delay, "retrying groq request");
                            },
                        )
                        .await
                }
            })
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("groq response had no choices".to_string()))?;

        Ok(GenerationResult {
            text: choice.message.content,
            finish_reason: match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::MaxTokens,
                Some("tool_calls") => FinishReason::ToolCall,
                _ => FinishReason::Stop,
            },
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            completion_tokens: response
                .usage
                .as_ref()
                .map(|u| u.completion_tokens)
                .unwrap_or(0),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
    ) -> Result<BoxStream<'static, Result<GenerationChunk>>> {
        let breaker = breaker_registry().get_or_create(BREAKER_NAME, CircuitBreakerConfig::default());
        let client = self.client.clone();
        let url = format!("{}/chat/completions", self.endpoint());
        let api_key = self.config.api_key.clone().unwrap_or_default();
        let body = self.request_body(messages, true);

        let response = breaker
            .guard(|| async {
                client
                    .post(&url)
                    .bearer_auth(&api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| LlmError::from(e).into())
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("groq {status}: {body}")).into());
        }

        let byte_stream = response.bytes_stream();
        Ok(Box::pin(stream! {
            use futures::StreamExt;
            tokio::pin!(byte_stream);
            let mut buffer = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(LlmError::from(e).into());
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    if data == "[DONE]" {
                        yield Ok(GenerationChunk { delta: String::new(), finish_reason: Some(FinishReason::Stop) });
                        return;
                    }
                    match serde_json::from_str::<ChatStreamChunk>(data) {
                        Ok(parsed) => {
                            if let Some(choice) = parsed.choices.into_iter().next() {
                                let finish_reason = choice.finish_reason.as_deref().map(|r| match r {
                                    "length" => FinishReason::MaxTokens,
                                    "tool_calls" => FinishReason::ToolCall,
                                    _ => FinishReason::Stop,
                                });
                                let delta = choice.delta.content.unwrap_or_default();
                                yield Ok(GenerationChunk { delta, finish_reason });
                            }
                        }
                        Err(e) => {
                            yield Err(LlmError::InvalidResponse(e.to_string()).into());
                            return;
                        }
                    }
                }
            }
        }))
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: match msg.role {
                TurnRole::System => "system".to_string(),
                TurnRole::User => "user".to_string(),
                TurnRole::Assistant => "assistant".to_string(),
            },
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_construction_without_api_key() {
        let config = LlmConfig {
            api_key: None,
            ..Default::default()
        };
        assert!(GroqBackend::new(config).is_err());
    }

    #[test]
    fn accepts_construction_with_api_key() {
        let config = LlmConfig {
            api_key: Some("gsk_test".to_string()),
            ..Default::default()
        };
        assert!(GroqBackend::new(config).is_ok());
    }
}
