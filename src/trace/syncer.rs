//! Syncer: flushes sanitized, dependency-ordered traces to the cloud
//! catalog in batches, retrying transient failures with exponential
//! backoff. Flushing is never automatic on a timer (spec §4.F) — a caller
//! (the CLI's idle loop, or an explicit `flushTraces` call) decides when.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::catalog::CatalogClient;
use crate::db;
use crate::error::PmlResult;

use super::{sanitize, topological_order};

const DEFAULT_BATCH_SIZE: usize = 10;
const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Default, Clone, Copy)]
pub struct SyncOutcome {
    pub uploaded: usize,
    pub batches: usize,
}

pub struct Syncer {
    db: SqlitePool,
    catalog: Arc<CatalogClient>,
    batch_size: usize,
}

impl Syncer {
    pub fn new(db: SqlitePool, catalog: Arc<CatalogClient>) -> Self {
        Self {
            db,
            catalog,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Pulls every unsynced trace, sanitizes and orders it, and uploads it
    /// in fixed-size batches. A batch is only marked synced in the local
    /// store after the catalog acknowledges it — a crash mid-flush leaves
    /// the remaining traces queued for the next call, never lost. A batch
    /// that exhausts its retries is dropped and logged rather than aborting
    /// the rest of the flush: availability trumps completeness, so later
    /// batches still get their chance to upload.
    pub async fn flush(&self) -> PmlResult<SyncOutcome> {
        let unsynced = db::traces::list_unsynced(&self.db).await?;
        let ordered = topological_order(unsynced);

        let mut outcome = SyncOutcome::default();
        for chunk in ordered.chunks(self.batch_size) {
            let payload: Vec<serde_json::Value> = chunk
                .iter()
                .map(|t| sanitize(&serde_json::to_value(t).unwrap_or(serde_json::Value::Null)))
                .collect();
            let ids: Vec<uuid::Uuid> = chunk.iter().map(|t| t.trace_id).collect();

            if let Err(e) = self.upload_with_retry(&payload).await {
                debug!(error = %e, batch_size = chunk.len(), "trace batch exhausted retries, dropping");
                continue;
            }
            db::traces::mark_synced(&self.db, &ids).await?;

            outcome.uploaded += chunk.len();
            outcome.batches += 1;
        }
        Ok(outcome)
    }

    async fn upload_with_retry(&self, batch: &[serde_json::Value]) -> PmlResult<()> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.catalog.upload_traces(batch).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 >= MAX_RETRIES => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "trace batch upload failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionTrace;

    #[tokio::test]
    async fn flush_is_a_noop_with_nothing_queued() {
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        let catalog = Arc::new(CatalogClient::new("https://cloud.pml.dev", "key").unwrap());
        let syncer = Syncer::new(pool, catalog);
        let outcome = syncer.flush().await.unwrap();
        assert_eq!(outcome.uploaded, 0);
        assert_eq!(outcome.batches, 0);
    }

    #[tokio::test]
    async fn batch_size_caps_traces_per_upload_call() {
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        for _ in 0..3 {
            let trace = ExecutionTrace::new_root(None);
            db::traces::insert(&pool, &trace).await.unwrap();
        }
        // No reachable cloud endpoint: a real `flush` call would exhaust
        // retries and drop this batch, but batching into ceil(3 / 10) = 1
        // chunk is what's under test here.
        let unsynced = db::traces::list_unsynced(&pool).await.unwrap();
        assert_eq!(unsynced.len(), 3);
        let ordered = topological_order(unsynced);
        assert_eq!(ordered.chunks(DEFAULT_BATCH_SIZE).count(), 1);
    }
}
