//! Process-wide call registry (§4.6 "external id mapping").
//!
//! Every backend (webhook, softswitch, SIP) normalises into the same
//! `internal_call_id` space. The registry is the one place that id is
//! minted and the one place a backend's own call id is translated back to
//! it on hangup/event delivery.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::call_handler::CallHandler;
use crate::error::ServerError;

/// Generic over the stored value so the mapping logic can be exercised
/// without spinning up a full [`CallHandler`] (which needs a conversation
/// engine). Production code only ever uses [`CallRegistry`].
pub struct GenericCallRegistry<V> {
    calls: DashMap<String, Arc<V>>,
    external_ids: DashMap<String, String>,
}

pub type CallRegistry = GenericCallRegistry<CallHandler>;

impl<V> Default for GenericCallRegistry<V> {
    fn default() -> Self {
        Self {
            calls: DashMap::new(),
            external_ids: DashMap::new(),
        }
    }
}

impl<V> GenericCallRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh id for a new call, in the same namespace `CallFsm` expects
    /// (callers construct the handler with this id *before* registering it,
    /// so the registry key and the handler's own `call_id` never diverge).
    pub fn mint_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Registers `handler` under `internal_id`, recording the backend's
    /// `external_id` so a later hangup/event referencing only the external
    /// id can still be routed.
    pub fn insert(&self, internal_id: impl Into<String>, external_id: &str, handler: Arc<V>) {
        let internal_id = internal_id.into();
        self.external_ids.insert(external_id.to_string(), internal_id.clone());
        self.calls.insert(internal_id, handler);
    }

    pub fn get(&self, internal_call_id: &str) -> Option<Arc<V>> {
        self.calls.get(internal_call_id).map(|entry| entry.clone())
    }

    pub fn get_by_external_id(&self, external_id: &str) -> Result<Arc<V>, ServerError> {
        let internal_id = self
            .external_ids
            .get(external_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ServerError::UnknownCall(external_id.to_string()))?;
        self.get(&internal_id)
            .ok_or_else(|| ServerError::UnknownCall(internal_id))
    }

    pub fn remove_by_external_id(&self, external_id: &str) -> Option<Arc<V>> {
        let (_, internal_id) = self.external_ids.remove(external_id)?;
        self.calls.remove(&internal_id).map(|(_, handler)| handler)
    }

    pub fn remove(&self, internal_call_id: &str) -> Option<Arc<V>> {
        self.calls.remove(internal_call_id).map(|(_, handler)| handler)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_resolves_to_the_registered_internal_id() {
        let registry: GenericCallRegistry<&str> = GenericCallRegistry::new();
        let internal_id = GenericCallRegistry::<&str>::mint_id();
        registry.insert(internal_id.clone(), "ext-1", Arc::new("handler"));
        let resolved = registry.get_by_external_id("ext-1").unwrap();
        assert!(Arc::ptr_eq(&resolved, &registry.get(&internal_id).unwrap()));
    }

    #[test]
    fn unknown_external_id_is_an_error() {
        let registry: GenericCallRegistry<&str> = GenericCallRegistry::new();
        assert!(registry.get_by_external_id("missing").is_err());
    }

    #[test]
    fn removing_by_external_id_drops_both_mappings() {
        let registry: GenericCallRegistry<&str> = GenericCallRegistry::new();
        let internal_id = GenericCallRegistry::<&str>::mint_id();
        registry.insert(internal_id.clone(), "ext-1", Arc::new("handler"));
        assert!(registry.remove_by_external_id("ext-1").is_some());
        assert!(registry.get(&internal_id).is_none());
        assert!(registry.get_by_external_id("ext-1").is_err());
    }
}
