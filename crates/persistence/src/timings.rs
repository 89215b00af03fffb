//! Per-call timing rollups (one row per turn, the way `TurnTiming` is
//! produced by `phone-agent-agent`'s conversation loop).

use async_trait::async_trait;
use phone_agent_core::TurnTiming;

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

#[async_trait]
pub trait TimingRepository: Send + Sync {
    async fn record(&self, call_id: &str, turn_index: i32, timing: &TurnTiming) -> Result<(), PersistenceError>;
    async fn list(&self, call_id: &str) -> Result<Vec<TurnTiming>, PersistenceError>;
}

#[derive(Clone)]
pub struct ScyllaTimingRepository {
    client: ScyllaClient,
}

impl ScyllaTimingRepository {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TimingRepository for ScyllaTimingRepository {
    async fn record(&self, call_id: &str, turn_index: i32, timing: &TurnTiming) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.call_timings (
                call_id, turn_index, stt_ms, llm_first_token_ms, llm_total_ms,
                tts_first_chunk_ms, tts_total_ms, turn_total_ms, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    call_id,
                    turn_index,
                    timing.stt_ms,
                    timing.llm_first_token_ms,
                    timing.llm_total_ms,
                    timing.tts_first_chunk_ms,
                    timing.tts_total_ms,
                    timing.turn_total_ms,
                    chrono::Utc::now().timestamp_millis(),
                ),
            )
            .await?;

        Ok(())
    }

    async fn list(&self, call_id: &str) -> Result<Vec<TurnTiming>, PersistenceError> {
        let query = format!(
            "SELECT stt_ms, llm_first_token_ms, llm_total_ms, tts_first_chunk_ms, tts_total_ms, turn_total_ms
             FROM {}.call_timings WHERE call_id = ?",
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (call_id,)).await?;

        let mut timings = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (stt_ms, llm_first_token_ms, llm_total_ms, tts_first_chunk_ms, tts_total_ms, turn_total_ms): (
                    Option<f64>,
                    Option<f64>,
                    Option<f64>,
                    Option<f64>,
                    Option<f64>,
                    Option<f64>,
                ) = row.into_typed().map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                timings.push(TurnTiming {
                    stt_ms,
                    llm_first_token_ms,
                    llm_total_ms,
                    tts_first_chunk_ms,
                    tts_total_ms,
                    turn_total_ms,
                });
            }
        }

        Ok(timings)
    }
}
