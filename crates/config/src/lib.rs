//! Layered configuration loading for the phone agent process
//!
//! Files first (`config/default.{yaml,toml}`, `config/{env}.{yaml,toml}`),
//! then `PHONE_AGENT_`-prefixed environment variables, then the bare
//! `AI_MODE` carve-out (§6).

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, FeatureFlags, ObservabilityConfig, PersistenceConfig, PipelineConfig,
    ProviderConfig, ProviderMode, RateLimitConfig, RoleProviderConfig, RuntimeEnvironment,
    ServerConfig, Settings, VadBackend, VadProviderConfig, WebhookAuthConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for phone_agent_core::Error {
    fn from(err: ConfigError) -> Self {
        phone_agent_core::Error::Other(err.to_string())
    }
}
