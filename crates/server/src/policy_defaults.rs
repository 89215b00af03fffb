//! Trivial capability implementations used until a deployment plugs its own
//! policy bundle in (§4.8, §1 Non-goals: policy *content* is out of scope).
//!
//! `phone_agent_core::policy` already ships `NullTriagePolicy`,
//! `NullPromptProvider` and `AlwaysConsent`; it deliberately has no default
//! for `IntentDetector` or `TenantDirectory` since neither has an
//! uncontroversial no-op (an intent detector that always returns `None` and
//! a tenant directory that never resolves are both meaningful policy
//! choices, not vocabulary). The adapter supplies them here.

use async_trait::async_trait;

use phone_agent_core::{ConversationState, IntentDetector, Result, TenantContext, TenantDirectory};

/// Detects no intent, ever. A deployment replaces this with a real
/// classifier; the conversation engine only needs *some* implementation to
/// run.
pub struct NullIntentDetector;

#[async_trait]
impl IntentDetector for NullIntentDetector {
    async fn detect(&self, _text: &str, _conversation: &ConversationState) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Resolves every signal to nothing, so `TenantResolver` always falls back
/// to `TenantContext::fallback()` for single-tenant deployments.
pub struct NullTenantDirectory;

impl TenantDirectory for NullTenantDirectory {
    fn by_api_key(&self, _key: &str) -> Option<TenantContext> {
        None
    }
    fn by_subdomain(&self, _subdomain: &str) -> Option<TenantContext> {
        None
    }
    fn by_phone_number(&self, _number: &str) -> Option<TenantContext> {
        None
    }
    fn by_email_domain(&self, _domain: &str) -> Option<TenantContext> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phone_agent_core::{TenantResolver, TenantSignals};
    use std::sync::Arc;

    #[tokio::test]
    async fn null_intent_detector_never_detects_anything() {
        let conversation = ConversationState::new();
        let detected = NullIntentDetector.detect("irrelevant", &conversation).await.unwrap();
        assert!(detected.is_none());
    }

    #[test]
    fn null_tenant_directory_falls_back_to_default_tenant() {
        let resolver = TenantResolver::new(Arc::new(NullTenantDirectory));
        let signals = TenantSignals { phone_number: Some("+49123".to_string()), ..Default::default() };
        let resolved = resolver.resolve(&signals).unwrap();
        assert_eq!(resolved.tenant.tenant_id, "default");
    }
}
