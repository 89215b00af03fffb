//! Table definitions for the four record kinds a repository is expected to
//! accept (§"Persisted state (core-visible)"): per-turn transcripts,
//! per-call timing rollups, per-call state transitions, and audit events.
//! Everything else — CRM, job queues, consent records, campaign data — is
//! the concern of whatever system owns the real schema; this one exists so
//! the reference backend has somewhere to write what the core produces.

use scylla::Session;

use crate::error::PersistenceError;

pub async fn create_keyspace(session: &Session, keyspace: &str, replication_factor: u8) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {replication_factor}}}"
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create keyspace: {e}")))?;

    Ok(())
}

pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    let transcripts = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {keyspace}.transcripts (
            call_id TEXT,
            turn_index INT,
            role TEXT,
            content TEXT,
            annotations_json TEXT,
            created_at TIMESTAMP,
            PRIMARY KEY ((call_id), turn_index)
        ) WITH CLUSTERING ORDER BY (turn_index ASC)
        "#
    );
    session
        .query_unpaged(transcripts, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create transcripts table: {e}")))?;

    let timings = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {keyspace}.call_timings (
            call_id TEXT,
            turn_index INT,
            stt_ms DOUBLE,
            llm_first_token_ms DOUBLE,
            llm_total_ms DOUBLE,
            tts_first_chunk_ms DOUBLE,
            tts_total_ms DOUBLE,
            turn_total_ms DOUBLE,
            recorded_at TIMESTAMP,
            PRIMARY KEY ((call_id), turn_index)
        ) WITH CLUSTERING ORDER BY (turn_index ASC)
        "#
    );
    session
        .query_unpaged(timings, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create call_timings table: {e}")))?;

    let transitions = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {keyspace}.call_transitions (
            call_id TEXT,
            timestamp TIMESTAMP,
            id TIMEUUID,
            from_state TEXT,
            to_state TEXT,
            event TEXT,
            PRIMARY KEY ((call_id), timestamp, id)
        ) WITH CLUSTERING ORDER BY (timestamp ASC, id ASC)
        "#
    );
    session
        .query_unpaged(transitions, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create call_transitions table: {e}")))?;

    // Hash-chained so a missing or altered entry breaks verification;
    // partitioned by day and call so a single compliance audit stays a
    // bounded partition scan instead of a full-table one.
    let audit_log = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {keyspace}.audit_log (
            partition_date TEXT,
            call_id TEXT,
            timestamp BIGINT,
            id UUID,
            actor_type TEXT,
            actor_id TEXT,
            action TEXT,
            resource_type TEXT,
            resource_id TEXT,
            outcome TEXT,
            details TEXT,
            previous_hash TEXT,
            hash TEXT,
            PRIMARY KEY ((partition_date, call_id), timestamp, id)
        ) WITH CLUSTERING ORDER BY (timestamp DESC, id DESC)
        "#
    );
    session
        .query_unpaged(audit_log, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create audit_log table: {e}")))?;

    tracing::info!("schema ensured: transcripts, call_timings, call_transitions, audit_log");
    Ok(())
}
