//! Session result records and cumulative pilot stats

use serde::Serialize;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use super::client::{PersistenceClient, StoreError};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

/// Completed session row
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub mode: String,
    pub map: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_secs: u32,
    pub player_count: u32,
}

/// Per-player result row, merged into cumulative stats by the service
#[derive(Debug, Clone, Serialize)]
pub struct PilotSessionStats {
    pub session_id: Uuid,
    pub player_id: Uuid,
    pub score: u32,
    pub kills: u32,
    pub deaths: u32,
    pub placement: u32,
    /// Out-of-envelope movement corrections, for offline review
    pub movement_violations: u32,
}

/// Upsert-style writer for session outcomes
#[derive(Clone)]
pub struct RecordStore {
    client: PersistenceClient,
}

impl RecordStore {
    pub fn new(client: PersistenceClient) -> Self {
        Self { client }
    }

    pub async fn upsert_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.client.upsert("sessions", record, "id").await
    }

    pub async fn upsert_pilot_stats(&self, stats: &PilotSessionStats) -> Result<(), StoreError> {
        self.client
            .upsert("pilot_session_stats", stats, "session_id,player_id")
            .await
    }

    /// Persist a full session outcome with bounded retries. Failures are
    /// logged and dropped; game results were already delivered to clients.
    pub async fn persist_session_outcome(
        &self,
        record: SessionRecord,
        stats: Vec<PilotSessionStats>,
    ) {
        if !self
            .with_retry("session record", || self.upsert_session(&record))
            .await
        {
            return;
        }

        for entry in &stats {
            self.with_retry("pilot stats", || self.upsert_pilot_stats(entry))
                .await;
        }
    }

    async fn with_retry<'a, F, Fut>(&'a self, what: &str, op: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), StoreError>> + 'a,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            match op().await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(what, attempt, error = %e, "Persistence write failed");
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(
                            BACKOFF_BASE_MS * 2u64.pow(attempt - 1),
                        ))
                        .await;
                    }
                }
            }
        }
        error!(what, "Persistence write abandoned after {} attempts", MAX_ATTEMPTS);
        false
    }
}
