//! Per-turn transcript storage (role, content, timestamps, annotations).

use async_trait::async_trait;
use phone_agent_core::{Turn, TurnAnnotations, TurnRole};

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    async fn append(&self, call_id: &str, turn_index: i32, turn: &Turn) -> Result<(), PersistenceError>;
    async fn list(&self, call_id: &str) -> Result<Vec<Turn>, PersistenceError>;
}

#[derive(Clone)]
pub struct ScyllaTranscriptRepository {
    client: ScyllaClient,
}

impl ScyllaTranscriptRepository {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

fn role_str(role: TurnRole) -> &'static str {
    match role {
        TurnRole::System => "system",
        TurnRole::User => "user",
        TurnRole::Assistant => "assistant",
    }
}

fn role_from_str(s: &str) -> TurnRole {
    match s {
        "system" => TurnRole::System,
        "assistant" => TurnRole::Assistant,
        _ => TurnRole::User,
    }
}

#[async_trait]
impl TranscriptRepository for ScyllaTranscriptRepository {
    async fn append(&self, call_id: &str, turn_index: i32, turn: &Turn) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.transcripts (call_id, turn_index, role, content, annotations_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        let annotations_json = serde_json::to_string(&turn.annotations)
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    call_id,
                    turn_index,
                    role_str(turn.role),
                    &turn.content,
                    annotations_json,
                    turn.timestamp.timestamp_millis(),
                ),
            )
            .await?;

        Ok(())
    }

    async fn list(&self, call_id: &str) -> Result<Vec<Turn>, PersistenceError> {
        let query = format!(
            "SELECT role, content, annotations_json, created_at FROM {}.transcripts WHERE call_id = ?",
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (call_id,)).await?;

        let mut turns = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (role, content, annotations_json, created_at): (String, String, String, i64) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                let annotations: TurnAnnotations = serde_json::from_str(&annotations_json)
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                turns.push(Turn {
                    role: role_from_str(&role),
                    content,
                    timestamp: chrono::DateTime::from_timestamp_millis(created_at).unwrap_or_else(chrono::Utc::now),
                    annotations,
                });
            }
        }

        Ok(turns)
    }
}
