//! Local LLM backend: Ollama's OpenAI-adjacent chat API (§6 provider table,
//! `providers.mode = "local"`).

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

const BREAKER_NAME: &str = "llm.ollama";

#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    config: LlmConfig,
}

impl OllamaBackend {
    pub fn new(config: LlmConfig) -> Result<Self> {
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
            .unwrap_or_else(|| phone_agent_config::constants::endpoints::OLLAMA_DEFAULT.clone())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.config.max_retries.max(1))
    }

    async fn chat(&self, messages: &[Message], stream_response: bool) -> Result<OllamaChatResponse> {
        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: stream_response,
            options: OllamaOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: self.config.max_tokens as i32,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint()))
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                LlmError::Network(format!("ollama {status}: {body}")).into()
            } else {
                LlmError::Api(format!("ollama {status}: {body}")).into()
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()).into())
    }
}

#[async_trait]
impl LanguageModel for OllamaBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult> {
        let breaker = breaker_registry().get_or_create(BREAKER_NAME, CircuitBreakerConfig::default());
        let policy = self.retry_policy();
        let this = self.clone();
        let messages = messages.to_vec();

        breaker
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
                                async move { this.chat(&messages, false).await }
                            },
                            Error::is_transient,
                            |_| false,
                            |_, attempt, delay| {
                                tracing::debug!(attempt, ?delay, "retrying ollama request");
                            },
                        )
                        .await
                }
            })
            .await
            .map(|resp| GenerationResult {
                text: resp.message.content,
                finish_reason: if resp.done {
                    FinishReason::Stop
                } else {
                    FinishReason::MaxTokens
                },
                prompt_tokens: 0,
                completion_tokens: resp.eval_count.unwrap_or(0) as u32,
            })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
    ) -> Result<BoxStream<'static, Result<GenerationChunk>>> {
        let breaker = breaker_registry().get_or_create(BREAKER_NAME, CircuitBreakerConfig::default());
        let client = self.client.clone();
        let url = format!("{}/api/chat", self.endpoint());
        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: true,
            options: OllamaOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: self.config.max_tokens as i32,
            },
        };

        let response = breaker
            .guard(|| async {
                client
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| LlmError::from(e).into())
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("ollama {status}: {body}")).into());
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
                    match serde_json::from_str::<OllamaStreamChunk>(&line) {
                        Ok(parsed) => {
                            let finish_reason = if parsed.done { Some(FinishReason::Stop) } else { None };
                            yield Ok(GenerationChunk {
                                delta: parsed.message.content,
                                finish_reason,
                            });
                            if parsed.done {
                                return;
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
        true
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
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

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    done: bool,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    message: OllamaMessage,
    done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_falls_back_to_default_when_unset() {
        let backend = OllamaBackend::new(LlmConfig {
            endpoint: None,
            ..Default::default()
        })
        .unwrap();
        assert!(backend.endpoint().starts_with("http"));
    }

    #[test]
    fn endpoint_honors_explicit_override() {
        let backend = OllamaBackend::new(LlmConfig {
            endpoint: Some("http://ollama.internal:11434".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(backend.endpoint(), "http://ollama.internal:11434");
    }

    #[test]
    fn message_role_mapping_round_trips() {
        let msg = Message {
            role: TurnRole::User,
            content: "hallo".to_string(),
        };
        let converted = OllamaMessage::from(&msg);
        assert_eq!(converted.role, "user");
        assert_eq!(converted.content, "hallo");
    }
}
