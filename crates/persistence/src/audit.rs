//! Hash-chained audit log (actor, action, resource, timestamp). Each entry
//! embeds the hash of the entry before it in the same call, so a deleted or
//! altered row breaks the chain and `verify_chain` catches it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl AuditOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "failure" => Self::Failure,
            "denied" => Self::Denied,
            _ => Self::Success,
        }
    }
}

/// Who performed the action: a caller-facing operator, the agent itself
/// acting autonomously, or an external system reacting to a webhook.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Actor {
    pub actor_type: String,
    pub actor_id: String,
}

impl Actor {
    pub fn agent() -> Self {
        Self { actor_type: "agent".to_string(), actor_id: "phone-agent".to_string() }
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self { actor_type: "system".to_string(), actor_id: id.into() }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
    pub previous_hash: Option<String>,
    pub hash: String,
}

fn compute_hash(previous_hash: &Option<String>, entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_deref().unwrap_or("").as_bytes());
    hasher.update(entry.call_id.as_bytes());
    hasher.update(entry.timestamp.timestamp_millis().to_le_bytes());
    hasher.update(entry.actor.actor_type.as_bytes());
    hasher.update(entry.actor.actor_id.as_bytes());
    hasher.update(entry.action.as_bytes());
    hasher.update(entry.resource_type.as_bytes());
    hasher.update(entry.resource_id.as_bytes());
    hasher.update(entry.outcome.as_str().as_bytes());
    hasher.update(entry.details.as_deref().unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Walks a run of entries in chronological order and confirms each entry's
/// `hash` is consistent with its `previous_hash` and contents.
pub fn verify_chain(entries: &[AuditEntry]) -> bool {
    entries.iter().all(|entry| compute_hash(&entry.previous_hash, entry) == entry.hash)
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(
        &self,
        call_id: &str,
        actor: Actor,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) -> Result<AuditEntry, PersistenceError>;

    async fn list(&self, call_id: &str) -> Result<Vec<AuditEntry>, PersistenceError>;
}

pub struct ScyllaAuditLog {
    client: ScyllaClient,
    /// Last hash written per call, kept in memory so chaining a new entry
    /// doesn't require a read-before-write round trip.
    last_hash: Mutex<HashMap<String, String>>,
}

impl ScyllaAuditLog {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client, last_hash: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl AuditLog for ScyllaAuditLog {
    async fn record(
        &self,
        call_id: &str,
        actor: Actor,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) -> Result<AuditEntry, PersistenceError> {
        let previous_hash = self.last_hash.lock().get(call_id).cloned();

        let mut entry = AuditEntry {
            id: Uuid::new_v4(),
            call_id: call_id.to_string(),
            timestamp: Utc::now(),
            actor,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            outcome,
            details,
            previous_hash: previous_hash.clone(),
            hash: String::new(),
        };
        entry.hash = compute_hash(&previous_hash, &entry);

        let query = format!(
            "INSERT INTO {}.audit_log (
                partition_date, call_id, timestamp, id, actor_type, actor_id,
                action, resource_type, resource_id, outcome, details, previous_hash, hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    entry.timestamp.format("%Y-%m-%d").to_string(),
                    &entry.call_id,
                    entry.timestamp.timestamp_millis(),
                    entry.id,
                    &entry.actor.actor_type,
                    &entry.actor.actor_id,
                    &entry.action,
                    &entry.resource_type,
                    &entry.resource_id,
                    entry.outcome.as_str(),
                    &entry.details,
                    &entry.previous_hash,
                    &entry.hash,
                ),
            )
            .await?;

        self.last_hash.lock().insert(call_id.to_string(), entry.hash.clone());

        tracing::info!(call_id, action, resource_type, resource_id, "audit event recorded");

        Ok(entry)
    }

    async fn list(&self, call_id: &str) -> Result<Vec<AuditEntry>, PersistenceError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let query = format!(
            "SELECT id, timestamp, actor_type, actor_id, action, resource_type, resource_id,
                    outcome, details, previous_hash, hash
             FROM {}.audit_log WHERE partition_date = ? AND call_id = ?",
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (today, call_id)).await?;

        let mut entries = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                #[allow(clippy::type_complexity)]
                let (id, timestamp, actor_type, actor_id, action, resource_type, resource_id, outcome, details, previous_hash, hash): (
                    Uuid,
                    i64,
                    String,
                    String,
                    String,
                    String,
                    String,
                    String,
                    Option<String>,
                    Option<String>,
                    String,
                ) = row.into_typed().map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                entries.push(AuditEntry {
                    id,
                    call_id: call_id.to_string(),
                    timestamp: DateTime::from_timestamp_millis(timestamp).unwrap_or_else(Utc::now),
                    actor: Actor { actor_type, actor_id },
                    action,
                    resource_type,
                    resource_id,
                    outcome: AuditOutcome::from_str(&outcome),
                    details,
                    previous_hash,
                    hash,
                });
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(previous_hash: Option<String>, action: &str) -> AuditEntry {
        let mut entry = AuditEntry {
            id: Uuid::new_v4(),
            call_id: "call-1".to_string(),
            timestamp: Utc::now(),
            actor: Actor::agent(),
            action: action.to_string(),
            resource_type: "appointment".to_string(),
            resource_id: "apt-1".to_string(),
            outcome: AuditOutcome::Success,
            details: None,
            previous_hash: previous_hash.clone(),
            hash: String::new(),
        };
        entry.hash = compute_hash(&previous_hash, &entry);
        entry
    }

    #[test]
    fn chain_of_untampered_entries_verifies() {
        let first = entry(None, "booked");
        let second = entry(Some(first.hash.clone()), "confirmed");
        assert!(verify_chain(&[first, second]));
    }

    #[test]
    fn tampering_with_an_entry_breaks_the_chain() {
        let first = entry(None, "booked");
        let mut second = entry(Some(first.hash.clone()), "confirmed");
        second.action = "cancelled".to_string();
        assert!(!verify_chain(&[first, second]));
    }
}
