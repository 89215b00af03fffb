//! Reference ScyllaDB persistence for the four record kinds the core
//! produces but does not own (§"Persisted state (core-visible)"):
//! per-turn transcripts, per-call timing rollups, per-call state
//! transitions, and audit events. CRM/appointment/consent schemas and
//! tenant-specific retention policy are the concern of whoever deploys this
//! core against a real backend; this crate just shows the shape.

pub mod audit;
pub mod client;
pub mod error;
pub mod schema;
pub mod timings;
pub mod transcripts;
pub mod transitions;

pub use audit::{Actor, AuditEntry, AuditLog, AuditOutcome, ScyllaAuditLog};
pub use client::{ScyllaClient, ScyllaConfig};
pub use error::PersistenceError;
pub use timings::{ScyllaTimingRepository, TimingRepository};
pub use transcripts::{ScyllaTranscriptRepository, TranscriptRepository};
pub use transitions::{ScyllaTransitionRepository, TransitionRepository};

/// All four repositories behind one connection, wired up the way a call
/// handler would use them.
pub struct PersistenceLayer {
    pub transcripts: ScyllaTranscriptRepository,
    pub timings: ScyllaTimingRepository,
    pub transitions: ScyllaTransitionRepository,
    pub audit: ScyllaAuditLog,
}

pub async fn init(config: ScyllaConfig) -> Result<PersistenceLayer, PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;

    Ok(PersistenceLayer {
        transcripts: ScyllaTranscriptRepository::new(client.clone()),
        timings: ScyllaTimingRepository::new(client.clone()),
        transitions: ScyllaTransitionRepository::new(client.clone()),
        audit: ScyllaAuditLog::new(client),
    })
}
