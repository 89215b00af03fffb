//! Language model backends (§4.2 "AI Provider Abstractions", §6 provider
//! config table) implementing `phone_agent_core::LanguageModel`.
//!
//! Two backends, selected by `phone_agent_config::ProviderMode`:
//! - [`ollama`]: local, OpenAI-adjacent chat API served by an Ollama daemon.
//! - [`groq`]: cloud, OpenAI-compatible chat completions.
//!
//! [`factory`] builds the right one (or a hybrid fallback pair) from a
//! `ProviderConfig`, wrapping each in retry + circuit breaker per §4.1.

pub mod factory;
pub mod groq;
pub mod ollama;

pub use factory::build_language_model;
pub use groq::GroqBackend;
pub use ollama::OllamaBackend;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for phone_agent_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Network(_) => phone_agent_core::Error::Provider(err.to_string()),
            LlmError::Api(_) => phone_agent_core::Error::Provider(err.to_string()),
            LlmError::InvalidResponse(_) => phone_agent_core::Error::Provider(err.to_string()),
            LlmError::Configuration(msg) => phone_agent_core::Error::Other(msg),
        }
    }
}
