//! Tenant and language context resolution (§4.9, §1 Non-goals)
//!
//! Multi-tenant *business* logic (billing, quotas, per-tenant feature
//! flags) is out of scope; this module only resolves which tenant a call
//! belongs to, using the fixed resolution order below (§4.9), and caches the
//! result for the lifetime of the call.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::language::{Dialect, Language};

/// Signals a deployment might present to identify the tenant a call belongs
/// to, in the order they are tried (§4.9 "resolution order").
#[derive(Debug, Clone, Default)]
pub struct TenantSignals {
    pub api_key: Option<String>,
    pub subdomain: Option<String>,
    pub phone_number: Option<String>,
    pub email_domain: Option<String>,
}

/// Resolved tenant configuration relevant to call handling (§3 "Tenant
/// Context").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub display_name: String,
    pub default_language: Language,
    pub default_dialect: Dialect,
    pub supported_languages: Vec<Language>,
}

impl TenantContext {
    pub fn fallback() -> Self {
        Self {
            tenant_id: "default".to_string(),
            display_name: "Default Tenant".to_string(),
            default_language: Language::German,
            default_dialect: Dialect::Standard,
            supported_languages: Language::all().to_vec(),
        }
    }
}

/// Looks a tenant up for one of the resolution signals. Deployments provide
/// their own directory-backed implementation; the core only fixes the
/// resolution order and caching behaviour.
pub trait TenantDirectory: Send + Sync {
    fn by_api_key(&self, key: &str) -> Option<TenantContext>;
    fn by_subdomain(&self, subdomain: &str) -> Option<TenantContext>;
    fn by_phone_number(&self, number: &str) -> Option<TenantContext>;
    fn by_email_domain(&self, domain: &str) -> Option<TenantContext>;
}

/// Which signal ultimately resolved the tenant (§4.9 "resolution order").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantResolutionMethod {
    ApiKey,
    Subdomain,
    PhoneNumber,
    EmailDomain,
    Fallback,
}

/// Diagnostic shape a resolution returns, so a caller can observe which
/// signal matched and with what confidence rather than only the tenant
/// itself (§4.9: "each method returns `{tenant?, method, confidence, message}`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantResolution {
    pub tenant: TenantContext,
    pub method: TenantResolutionMethod,
    pub confidence: f32,
    pub message: String,
}

/// Resolves `TenantSignals` into a `TenantContext`, trying signals in the
/// fixed order `api_key > subdomain > phone_number > email_domain >
/// fallback` (§4.9), and caching per-signal lookups for the process
/// lifetime.
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    cache: dashmap::DashMap<String, TenantContext>,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>) -> Self {
        Self {
            directory,
            cache: dashmap::DashMap::new(),
        }
    }

    pub fn resolve(&self, signals: &TenantSignals) -> Result<TenantResolution> {
        if let Some(key) = &signals.api_key {
            if let Some(cached) = self.cache.get(&cache_key("api_key", key)) {
                return Ok(resolution(cached.clone(), TenantResolutionMethod::ApiKey, 1.0, "matched cached api_key"));
            }
            if let Some(ctx) = self.directory.by_api_key(key) {
                self.cache.insert(cache_key("api_key", key), ctx.clone());
                return Ok(resolution(ctx, TenantResolutionMethod::ApiKey, 1.0, "matched api_key"));
            }
        }
        if let Some(subdomain) = &signals.subdomain {
            if let Some(cached) = self.cache.get(&cache_key("subdomain", subdomain)) {
                return Ok(resolution(cached.clone(), TenantResolutionMethod::Subdomain, 1.0, "matched cached subdomain"));
            }
            if let Some(ctx) = self.directory.by_subdomain(subdomain) {
                self.cache
                    .insert(cache_key("subdomain", subdomain), ctx.clone());
                return Ok(resolution(ctx, TenantResolutionMethod::Subdomain, 1.0, "matched subdomain"));
            }
        }
        if let Some(number) = &signals.phone_number {
            if let Some(cached) = self.cache.get(&cache_key("phone", number)) {
                return Ok(resolution(cached.clone(), TenantResolutionMethod::PhoneNumber, 1.0, "matched cached phone_number"));
            }
            if let Some(ctx) = self.directory.by_phone_number(number) {
                self.cache.insert(cache_key("phone", number), ctx.clone());
                return Ok(resolution(ctx, TenantResolutionMethod::PhoneNumber, 1.0, "matched phone_number"));
            }
        }
        if let Some(domain) = &signals.email_domain {
            if let Some(cached) = self.cache.get(&cache_key("email", domain)) {
                return Ok(resolution(cached.clone(), TenantResolutionMethod::EmailDomain, 1.0, "matched cached email_domain"));
            }
            if let Some(ctx) = self.directory.by_email_domain(domain) {
                self.cache.insert(cache_key("email", domain), ctx.clone());
                return Ok(resolution(ctx, TenantResolutionMethod::EmailDomain, 1.0, "matched email_domain"));
            }
        }
        if signals.api_key.is_none()
            && signals.subdomain.is_none()
            && signals.phone_number.is_none()
            && signals.email_domain.is_none()
        {
            return Err(Error::Other("no tenant signals provided".to_string()));
        }
        Ok(resolution(
            TenantContext::fallback(),
            TenantResolutionMethod::Fallback,
            0.0,
            "no signal matched a known tenant; using the configured fallback",
        ))
    }
}

fn resolution(
    tenant: TenantContext,
    method: TenantResolutionMethod,
    confidence: f32,
    message: impl Into<String>,
) -> TenantResolution {
    TenantResolution { tenant, method, confidence, message: message.into() }
}

fn cache_key(kind: &str, value: &str) -> String {
    format!("{kind}:{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeDirectory {
        by_key: HashMap<String, TenantContext>,
    }

    impl TenantDirectory for FakeDirectory {
        fn by_api_key(&self, key: &str) -> Option<TenantContext> {
            self.by_key.get(key).cloned()
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

    fn tenant(id: &str) -> TenantContext {
        TenantContext {
            tenant_id: id.to_string(),
            display_name: id.to_string(),
            default_language: Language::German,
            default_dialect: Dialect::Standard,
            supported_languages: vec![Language::German],
        }
    }

    #[test]
    fn api_key_takes_priority_over_subdomain() {
        let mut by_key = HashMap::new();
        by_key.insert("secret".to_string(), tenant("acme"));
        let resolver = TenantResolver::new(Arc::new(FakeDirectory { by_key }));
        let signals = TenantSignals {
            api_key: Some("secret".to_string()),
            subdomain: Some("other".to_string()),
            ..Default::default()
        };
        let resolved = resolver.resolve(&signals).unwrap();
        assert_eq!(resolved.tenant.tenant_id, "acme");
        assert_eq!(resolved.method, TenantResolutionMethod::ApiKey);
        assert_eq!(resolved.confidence, 1.0);
    }

    #[test]
    fn unresolved_signals_fall_back_to_default() {
        let resolver = TenantResolver::new(Arc::new(FakeDirectory {
            by_key: HashMap::new(),
        }));
        let signals = TenantSignals {
            phone_number: Some("+49123".to_string()),
            ..Default::default()
        };
        let resolved = resolver.resolve(&signals).unwrap();
        assert_eq!(resolved.tenant.tenant_id, "default");
        assert_eq!(resolved.method, TenantResolutionMethod::Fallback);
        assert_eq!(resolved.confidence, 0.0);
    }

    #[test]
    fn no_signals_at_all_is_an_error() {
        let resolver = TenantResolver::new(Arc::new(FakeDirectory {
            by_key: HashMap::new(),
        }));
        assert!(resolver.resolve(&TenantSignals::default()).is_err());
    }
}
