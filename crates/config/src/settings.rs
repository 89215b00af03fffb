//! Application settings: file + environment layered configuration (§6)

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::endpoints;
use crate::ConfigError;

/// Runtime environment, controlling validation strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// `mode` selector for the provider factory (§6 "AI provider configuration").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Local,
    #[default]
    Cloud,
    Hybrid,
}

impl ProviderMode {
    /// Parses the bare (non-prefixed) `AI_MODE` env var (§6 "Environment
    /// variables the core consumes").
    pub fn from_env() -> Option<Self> {
        match std::env::var("AI_MODE").ok()?.to_lowercase().as_str() {
            "local" => Some(Self::Local),
            "cloud" => Some(Self::Cloud),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// VAD backend selector (§6 "vad.backend").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VadBackend {
    Simple,
    #[default]
    Neural,
}

/// Per-role provider override (§6 table). One of these exists per role
/// (stt/llm/tts); `vad` uses `VadProviderConfig` below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleProviderConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_true")]
    pub retry_enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    256
}
fn default_max_attempts() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

impl Default for RoleProviderConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            voice_id: None,
            language: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            retry_enabled: default_true(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VadProviderConfig {
    #[serde(default)]
    pub backend: VadBackend,
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,
}

fn default_vad_threshold() -> f32 {
    crate::constants::audio::VAD_THRESHOLD
}

/// The full AI provider configuration table (§6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub mode: ProviderMode,
    #[serde(default)]
    pub fallback_to_local: bool,
    #[serde(default)]
    pub stt: RoleProviderConfig,
    #[serde(default)]
    pub llm: RoleProviderConfig,
    #[serde(default)]
    pub tts: RoleProviderConfig,
    #[serde(default)]
    pub vad: VadProviderConfig,
}

/// Audio pipeline tuning (§4.3, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_latency_budget_ms")]
    pub first_byte_latency_budget_ms: u64,
    #[serde(default = "default_frame_samples")]
    pub bridge_frame_samples: usize,
    #[serde(default = "default_voice_cache_size")]
    pub voice_cache_size: usize,
}

fn default_latency_budget_ms() -> u64 {
    800
}
fn default_frame_samples() -> usize {
    crate::constants::audio::BRIDGE_FRAME_SAMPLES
}
fn default_voice_cache_size() -> usize {
    2
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            first_byte_latency_budget_ms: default_latency_budget_ms(),
            bridge_frame_samples: default_frame_samples(),
            voice_cache_size: default_voice_cache_size(),
        }
    }
}

/// Rate limiting for the webhook surface (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f32,
}

fn default_requests_per_second() -> u32 {
    50
}
fn default_burst_multiplier() -> f32 {
    2.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: default_requests_per_second(),
            burst_multiplier: default_burst_multiplier(),
        }
    }
}

/// Webhook HMAC signature verification (§6 "Telephony-provider webhook
/// signatures").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookAuthConfig {
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
}

fn default_signature_header() -> String {
    "X-Signature".to_string()
}

/// HTTP server configuration for the webhook surface (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_audio_bridge_port")]
    pub audio_bridge_port: u16,
    #[serde(default = "default_softswitch_port")]
    pub softswitch_port: u16,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub webhook_auth: WebhookAuthConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_audio_bridge_port() -> u16 {
    9000
}
fn default_softswitch_port() -> u16 {
    8021
}
fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            audio_bridge_port: default_audio_bridge_port(),
            softswitch_port: default_softswitch_port(),
            timeout_seconds: default_timeout(),
            rate_limit: RateLimitConfig::default(),
            webhook_auth: WebhookAuthConfig::default(),
        }
    }
}

/// ScyllaDB persistence configuration (§6 "Persisted state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,
    #[serde(default = "default_scylla_keyspace")]
    pub keyspace: String,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

fn default_scylla_hosts() -> Vec<String> {
    std::env::var("SCYLLA_HOSTS")
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:9042".to_string()])
}

fn default_scylla_keyspace() -> String {
    std::env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| "phone_agent".to_string())
}

fn default_replication_factor() -> u8 {
    1
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_scylla_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

/// Observability configuration (logging/tracing/metrics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

/// Feature flags for staged rollout of pipeline behaviours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub streaming_tts: bool,
    #[serde(default = "default_true")]
    pub barge_in_enabled: bool,
    #[serde(default = "default_true")]
    pub dialect_detection_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            streaming_tts: true,
            barge_in_enabled: true,
            dialect_detection_enabled: true,
        }
    }
}

/// The full process configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_pipeline()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        if self.pipeline.first_byte_latency_budget_ms < 100 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.first_byte_latency_budget_ms".to_string(),
                message: "latency budget too low (minimum 100ms)".to_string(),
            });
        }
        if self.pipeline.first_byte_latency_budget_ms > 10_000 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.first_byte_latency_budget_ms".to_string(),
                message: "latency budget too high (maximum 10000ms)".to_string(),
            });
        }
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        if self.server.audio_bridge_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.audio_bridge_port".to_string(),
                message: "audio bridge port cannot be 0".to_string(),
            });
        }
        if self.environment.is_production() && self.server.webhook_auth.signing_secret.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "server.webhook_auth.signing_secret".to_string(),
                message: "signing secret must be set in production".to_string(),
            });
        }
        let rate_limit = &self.server.rate_limit;
        if rate_limit.enabled && rate_limit.requests_per_second == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.rate_limit.requests_per_second".to_string(),
                message: "must be at least 1 when rate limiting is enabled".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings, layering (lowest to highest priority):
/// 1. `config/default.{yaml,toml}`
/// 2. `config/{env}.{yaml,toml}`
/// 3. `PHONE_AGENT_`-prefixed environment variables
///
/// The bare `AI_MODE` env var, if set, overrides `providers.mode` after the
/// layered load (§6 "Environment variables the core consumes").
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();
    builder = builder.add_source(File::with_name("config/default").required(false));
    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }
    builder = builder.add_source(
        Environment::with_prefix("PHONE_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let mut settings: Settings = config.try_deserialize()?;

    if let Some(mode) = ProviderMode::from_env() {
        settings.providers.mode = mode;
    }

    let _ = &*endpoints::OLLAMA_DEFAULT; // touch the lazily-initialized static here so a malformed override env var fails load() instead of surfacing later on first use

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn pipeline_latency_bounds_are_enforced() {
        let mut settings = Settings::default();
        settings.pipeline.first_byte_latency_budget_ms = 50;
        assert!(settings.validate().is_err());
        settings.pipeline.first_byte_latency_budget_ms = 800;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn production_requires_webhook_signing_secret() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate().is_err());
        settings.server.webhook_auth.signing_secret = Some("secret".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn provider_mode_env_var_parses_known_values() {
        std::env::set_var("AI_MODE", "hybrid");
        assert_eq!(ProviderMode::from_env(), Some(ProviderMode::Hybrid));
        std::env::remove_var("AI_MODE");
        assert_eq!(ProviderMode::from_env(), None);
    }
}
