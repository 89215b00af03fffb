//! Builds a `LanguageModel` from provider configuration (§6 provider table).

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use phone_agent_config::{ProviderConfig, ProviderMode, RoleProviderConfig};
use phone_agent_core::{
    Error, GenerationChunk, GenerationResult, LanguageModel, LlmConfig, Message, Result,
};

use crate::{GroqBackend, OllamaBackend};

fn llm_config_from_role(role: &RoleProviderConfig) -> LlmConfig {
    LlmConfig {
        model: role
            .model
            .clone()
            .unwrap_or_else(|| "llama-3.1-8b-instant".to_string()),
        endpoint: None,
        api_key: role.api_key.clone(),
        max_tokens: role.max_tokens,
        temperature: role.temperature,
        top_p: 0.95,
        timeout_ms: phone_agent_config::constants::timeouts::LLM_REQUEST_MS,
        stream: true,
        max_retries: role.max_attempts,
    }
}

fn build_local(role: &RoleProviderConfig) -> Result<Arc<dyn LanguageModel>> {
    let mut config = llm_config_from_role(role);
    if config.model == "llama-3.1-8b-instant" {
        config.model = "qwen2.5:7b-instruct".to_string();
    }
    Ok(Arc::new(OllamaBackend::new(config)?))
}

fn build_cloud(role: &RoleProviderConfig) -> Result<Arc<dyn LanguageModel>> {
    Ok(Arc::new(GroqBackend::new(llm_config_from_role(role))?))
}

/// Builds the language model the conversation engine should use, honoring
/// `providers.mode` and the hybrid fallback flag (§6).
pub fn build_language_model(config: &ProviderConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.mode {
        ProviderMode::Local => build_local(&config.llm),
        ProviderMode::Cloud => build_cloud(&config.llm),
        ProviderMode::Hybrid => {
            let primary = build_cloud(&config.llm)?;
            if config.fallback_to_local {
                let fallback = build_local(&config.llm)?;
                Ok(Arc::new(HybridLanguageModel { primary, fallback }))
            } else {
                Ok(primary)
            }
        }
    }
}

/// Tries `primary`, falling back to `fallback` when the primary call fails
/// with a transient error (§4.1 "fallback to local on provider outage").
struct HybridLanguageModel {
    primary: Arc<dyn LanguageModel>,
    fallback: Arc<dyn LanguageModel>,
}

#[async_trait]
impl LanguageModel for HybridLanguageModel {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult> {
        match self.primary.generate(messages).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "primary llm failed, falling back to local");
                self.fallback.generate(messages).await
            }
            Err(err) => Err(err),
        }
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
    ) -> Result<BoxStream<'static, Result<GenerationChunk>>> {
        match self.primary.generate_stream(messages).await {
            Ok(stream) => Ok(stream),
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "primary llm stream failed, falling back to local");
                self.fallback.generate_stream(messages).await
            }
            Err(err) => Err(err),
        }
    }

    fn is_available(&self) -> bool {
        self.primary.is_available() || self.fallback.is_available()
    }

    fn model_name(&self) -> &str {
        self.primary.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_mode_builds_an_ollama_backend() {
        let config = ProviderConfig {
            mode: ProviderMode::Local,
            ..Default::default()
        };
        let model = build_language_model(&config).unwrap();
        assert!(!model.model_name().is_empty());
    }

    #[test]
    fn cloud_mode_without_api_key_fails_to_build() {
        let config = ProviderConfig {
            mode: ProviderMode::Cloud,
            ..Default::default()
        };
        assert!(build_language_model(&config).is_err());
    }

    #[test]
    fn cloud_mode_with_api_key_builds() {
        let mut config = ProviderConfig {
            mode: ProviderMode::Cloud,
            ..Default::default()
        };
        config.llm.api_key = Some("gsk_test".to_string());
        assert!(build_language_model(&config).is_ok());
    }
}
