//! Per-call state transition history, as recorded by
//! `phone-agent-agent::call_fsm`.

use async_trait::async_trait;
use phone_agent_core::StateTransitionRecord;
use uuid::Uuid;

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

#[async_trait]
pub trait TransitionRepository: Send + Sync {
    async fn record(&self, transition: &StateTransitionRecord) -> Result<(), PersistenceError>;
    async fn list(&self, call_id: &str) -> Result<Vec<StateTransitionRecord>, PersistenceError>;
}

#[derive(Clone)]
pub struct ScyllaTransitionRepository {
    client: ScyllaClient,
}

impl ScyllaTransitionRepository {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransitionRepository for ScyllaTransitionRepository {
    async fn record(&self, transition: &StateTransitionRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.call_transitions (call_id, timestamp, id, from_state, to_state, event)
             VALUES (?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &transition.call_id,
                    transition.timestamp.timestamp_millis(),
                    Uuid::new_v4(),
                    format!("{:?}", transition.from),
                    format!("{:?}", transition.to),
                    &transition.event,
                ),
            )
            .await?;

        Ok(())
    }

    async fn list(&self, call_id: &str) -> Result<Vec<StateTransitionRecord>, PersistenceError> {
        let query = format!(
            "SELECT from_state, to_state, event, timestamp FROM {}.call_transitions WHERE call_id = ?",
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (call_id,)).await?;

        let mut transitions = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (from_state, to_state, event, timestamp): (String, String, String, i64) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                transitions.push(StateTransitionRecord {
                    call_id: call_id.to_string(),
                    from: parse_call_state(&from_state),
                    to: parse_call_state(&to_state),
                    event,
                    timestamp: chrono::DateTime::from_timestamp_millis(timestamp).unwrap_or_else(chrono::Utc::now),
                });
            }
        }

        Ok(transitions)
    }
}

fn parse_call_state(s: &str) -> phone_agent_core::CallState {
    use phone_agent_core::CallState::*;
    match s {
        "Ringing" => Ringing,
        "Greeting" => Greeting,
        "Listening" => Listening,
        "Processing" => Processing,
        "Speaking" => Speaking,
        "Transferring" => Transferring,
        "Ended" => Ended,
        _ => Idle,
    }
}
