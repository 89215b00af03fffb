//! Shared application state (§4.6, §5 "process-wide, internally locked").

use std::sync::Arc;

use phone_agent_agent::ConversationEngine;
use phone_agent_config::Settings;
use phone_agent_core::{NullPromptProvider, NullTriagePolicy, TenantResolver, AlwaysConsent};
use phone_agent_persistence::PersistenceLayer;

use crate::error::ServerError;
use crate::policy_defaults::{NullIntentDetector, NullTenantDirectory};
use crate::registry::CallRegistry;

/// Everything a request handler or backend task needs: the shared
/// conversation engine, the process-wide call registry, configuration, and
/// (optionally) the persistence layer. Cloned cheaply — every field is an
/// `Arc` or otherwise shareable.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub engine: Arc<ConversationEngine>,
    pub calls: Arc<CallRegistry>,
    pub tenants: Arc<TenantResolver>,
    pub persistence: Option<Arc<PersistenceLayer>>,
}

impl AppState {
    /// Builds the engine and its backends from `config` (§6 provider
    /// table), wiring in trivial policy defaults until a deployment
    /// provides its own (§4.8, §1 Non-goals).
    pub fn new(config: Settings) -> Result<Self, ServerError> {
        let llm = phone_agent_llm::build_language_model(&config.providers)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let stt = phone_agent_pipeline::build_stt(&config.providers)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let tts = phone_agent_pipeline::build_tts(&config.providers, config.pipeline.voice_cache_size)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let vad = phone_agent_pipeline::build_vad(&config.providers.vad);

        let default_voice = config
            .providers
            .tts
            .voice_id
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let engine = Arc::new(ConversationEngine::new(
            llm,
            stt,
            tts,
            vad,
            Arc::new(NullPromptProvider),
            Arc::new(NullTriagePolicy),
            Arc::new(NullIntentDetector),
            Arc::new(AlwaysConsent),
            default_voice,
        ));

        let tenants = Arc::new(TenantResolver::new(Arc::new(NullTenantDirectory)));

        Ok(Self {
            config: Arc::new(config),
            engine,
            calls: Arc::new(CallRegistry::new()),
            tenants,
            persistence: None,
        })
    }

    pub fn with_persistence(mut self, persistence: Arc<PersistenceLayer>) -> Self {
        self.persistence = Some(persistence);
        self
    }
}
