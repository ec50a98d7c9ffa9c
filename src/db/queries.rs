//! Typed query functions, one module per table, called by the domain
//! layers above (lockfile, trace syncer, learning core) instead of letting
//! them touch `sqlx` directly.

use std::collections::HashSet;

use sqlx::{Row, SqlitePool};

use crate::domain::{
    AdaptiveThresholdState, Capability, CapabilityDependencyEdge, EdgeType, ExecutionTrace, LockfileEntry,
};
use crate::error::PmlResult;

pub mod lockfile {
    use super::*;

    pub async fn get(pool: &SqlitePool, fqdn: &str) -> PmlResult<Option<LockfileEntry>> {
        let row = sqlx::query("SELECT fqdn, integrity, kind, approved FROM lockfile_entries WHERE fqdn = ?")
            .bind(fqdn)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|r| LockfileEntry {
            fqdn: r.get("fqdn"),
            integrity: r.get("integrity"),
            kind: r.get("kind"),
            approved: r.get::<i64, _>("approved") != 0,
        }))
    }

    pub async fn upsert(pool: &SqlitePool, entry: &LockfileEntry) -> PmlResult<()> {
        sqlx::query(
            "INSERT INTO lockfile_entries (fqdn, integrity, kind, approved) VALUES (?, ?, ?, ?)
             ON CONFLICT(fqdn) DO UPDATE SET integrity = excluded.integrity, kind = excluded.kind, approved = excluded.approved",
        )
        .bind(&entry.fqdn)
        .bind(&entry.integrity)
        .bind(&entry.kind)
        .bind(entry.approved as i64)
        .execute(pool)
        .await?;
        Ok(())
    }
}

pub mod capabilities {
    use super::*;

    pub async fn get_by_fqdn(pool: &SqlitePool, fqdn: &str) -> PmlResult<Option<Capability>> {
        let row = sqlx::query(
            "SELECT id, fqdn, kind, intent, intent_embedding, code_hash, code, tools_used,
                    usage_count, success_rate, success_count, failure_count
             FROM capabilities WHERE fqdn = ?",
        )
        .bind(fqdn)
        .fetch_optional(pool)
        .await?;
        row.map(row_to_capability).transpose()
    }

    pub async fn get_by_code_hash(pool: &SqlitePool, code_hash: &str) -> PmlResult<Option<Capability>> {
        let row = sqlx::query(
            "SELECT id, fqdn, kind, intent, intent_embedding, code_hash, code, tools_used,
                    usage_count, success_rate, success_count, failure_count
             FROM capabilities WHERE code_hash = ?",
        )
        .bind(code_hash)
        .fetch_optional(pool)
        .await?;
        row.map(row_to_capability).transpose()
    }

    pub async fn list_all(pool: &SqlitePool) -> PmlResult<Vec<Capability>> {
        let rows = sqlx::query(
            "SELECT id, fqdn, kind, intent, intent_embedding, code_hash, code, tools_used,
                    usage_count, success_rate, success_count, failure_count
             FROM capabilities",
        )
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(row_to_capability).collect()
    }

    /// Deduplicates on `code_hash`: a capability with an already-seen hash
    /// is not re-inserted.
    pub async fn upsert(pool: &SqlitePool, cap: &Capability) -> PmlResult<()> {
        sqlx::query(
            "INSERT INTO capabilities
                (id, fqdn, kind, intent, intent_embedding, code_hash, code, tools_used,
                 usage_count, success_rate, success_count, failure_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(code_hash) DO UPDATE SET
                usage_count = excluded.usage_count,
                success_rate = excluded.success_rate,
                success_count = excluded.success_count,
                failure_count = excluded.failure_count",
        )
        .bind(&cap.id)
        .bind(&cap.fqdn)
        .bind(&cap.kind)
        .bind(&cap.intent)
        .bind(serde_json::to_string(&cap.intent_embedding)?)
        .bind(&cap.code_hash)
        .bind(&cap.code)
        .bind(serde_json::to_string(&cap.tools_used)?)
        .bind(cap.usage_count as i64)
        .bind(cap.success_rate)
        .bind(cap.success_count as i64)
        .bind(cap.failure_count as i64)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_dependency_edges(pool: &SqlitePool) -> PmlResult<Vec<CapabilityDependencyEdge>> {
        let rows = sqlx::query(
            "SELECT from_id, to_id, edge_type, confidence, observed_count FROM capability_dependencies",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let edge_type: String = r.get("edge_type");
                let edge_type = match edge_type.as_str() {
                    "dependency" => EdgeType::Dependency,
                    "contains" => EdgeType::Contains,
                    "sequence" => EdgeType::Sequence,
                    "alternative" => EdgeType::Alternative,
                    _ => return None,
                };
                Some(CapabilityDependencyEdge {
                    from_id: r.get("from_id"),
                    to_id: r.get("to_id"),
                    edge_type,
                    confidence: r.get("confidence"),
                    observed_count: r.get::<i64, _>("observed_count") as u64,
                })
            })
            .collect())
    }

    fn row_to_capability(row: sqlx::sqlite::SqliteRow) -> PmlResult<Capability> {
        let tools_used: String = row.get("tools_used");
        let intent_embedding: String = row.get("intent_embedding");
        Ok(Capability {
            id: row.get("id"),
            fqdn: row.get("fqdn"),
            kind: row.get("kind"),
            intent: row.get("intent"),
            intent_embedding: serde_json::from_str(&intent_embedding)?,
            code_hash: row.get("code_hash"),
            code: row.get("code"),
            tools_used: serde_json::from_str::<HashSet<String>>(&tools_used)?,
            usage_count: row.get::<i64, _>("usage_count") as u64,
            success_rate: row.get("success_rate"),
            success_count: row.get::<i64, _>("success_count") as u64,
            failure_count: row.get::<i64, _>("failure_count") as u64,
        })
    }
}

pub mod traces {
    use super::*;

    pub async fn insert(pool: &SqlitePool, trace: &ExecutionTrace) -> PmlResult<()> {
        sqlx::query(
            "INSERT INTO execution_traces
                (trace_id, parent_trace_id, capability_id, workflow_id, success, duration_ms,
                 task_results, decisions, timestamp, executed_path, priority, synced)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(trace.trace_id.to_string())
        .bind(trace.parent_trace_id.map(|id| id.to_string()))
        .bind(&trace.capability_id)
        .bind(trace.workflow_id.map(|id| id.to_string()))
        .bind(trace.success as i64)
        .bind(trace.duration_ms as i64)
        .bind(serde_json::to_string(&trace.task_results)?)
        .bind(serde_json::to_string(&trace.decisions)?)
        .bind(trace.timestamp.to_rfc3339())
        .bind(serde_json::to_string(&trace.executed_path)?)
        .bind(trace.priority)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_synced(pool: &SqlitePool, trace_ids: &[uuid::Uuid]) -> PmlResult<()> {
        for id in trace_ids {
            sqlx::query("UPDATE execution_traces SET synced = 1 WHERE trace_id = ?")
                .bind(id.to_string())
                .execute(pool)
                .await?;
        }
        Ok(())
    }

    pub async fn unsynced_count(pool: &SqlitePool) -> PmlResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM execution_traces WHERE synced = 0")
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }

    pub async fn list_unsynced(pool: &SqlitePool) -> PmlResult<Vec<ExecutionTrace>> {
        let rows = sqlx::query(
            "SELECT trace_id, parent_trace_id, capability_id, workflow_id, success, duration_ms,
                    task_results, decisions, timestamp, executed_path, priority
             FROM execution_traces WHERE synced = 0 ORDER BY timestamp ASC",
        )
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(row_to_trace).collect()
    }

    fn parse_uuid(s: &str) -> PmlResult<uuid::Uuid> {
        uuid::Uuid::parse_str(s)
            .map_err(|e| sqlx::Error::Protocol(format!("invalid uuid: {e}")).into())
    }

    fn row_to_trace(row: sqlx::sqlite::SqliteRow) -> PmlResult<ExecutionTrace> {
        let trace_id: String = row.get("trace_id");
        let parent_trace_id: Option<String> = row.get("parent_trace_id");
        let workflow_id: Option<String> = row.get("workflow_id");
        let task_results: String = row.get("task_results");
        let decisions: String = row.get("decisions");
        let executed_path: String = row.get("executed_path");
        let timestamp: String = row.get("timestamp");

        Ok(ExecutionTrace {
            trace_id: parse_uuid(&trace_id)?,
            parent_trace_id: parent_trace_id.map(|s| parse_uuid(&s)).transpose()?,
            capability_id: row.get("capability_id"),
            workflow_id: workflow_id.map(|s| parse_uuid(&s)).transpose()?,
            success: row.get::<i64, _>("success") != 0,
            duration_ms: row.get::<i64, _>("duration_ms") as u64,
            task_results: serde_json::from_str(&task_results)?,
            decisions: serde_json::from_str(&decisions)?,
            timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| sqlx::Error::Protocol(format!("invalid timestamp: {e}")))?
                .with_timezone(&chrono::Utc),
            executed_path: serde_json::from_str(&executed_path)?,
            priority: row.get("priority"),
        })
    }
}

/// Single-row (`id = 1`) persistence for [`AdaptiveThresholdState`]. The
/// windowed history itself is never persisted (open question (ii):
/// reset-on-load) — only the converged thresholds and their tuning knobs.
pub mod threshold {
    use super::*;

    pub async fn load(pool: &SqlitePool) -> PmlResult<Option<AdaptiveThresholdState>> {
        let row = sqlx::query(
            "SELECT explicit_threshold, suggestion_threshold, learning_rate, target_success_rate,
                    window_size, min_threshold, max_threshold
             FROM threshold_state WHERE id = 1",
        )
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|r| AdaptiveThresholdState {
            explicit_threshold: r.get("explicit_threshold"),
            suggestion_threshold: r.get("suggestion_threshold"),
            windowed_history: std::collections::VecDeque::new(),
            learning_rate: r.get("learning_rate"),
            target_success_rate: r.get("target_success_rate"),
            window_size: r.get::<i64, _>("window_size") as usize,
            min_threshold: r.get("min_threshold"),
            max_threshold: r.get("max_threshold"),
        }))
    }

    pub async fn save(pool: &SqlitePool, state: &AdaptiveThresholdState) -> PmlResult<()> {
        sqlx::query(
            "INSERT INTO threshold_state
                (id, explicit_threshold, suggestion_threshold, learning_rate, target_success_rate,
                 window_size, min_threshold, max_threshold)
             VALUES (1, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                explicit_threshold = excluded.explicit_threshold,
                suggestion_threshold = excluded.suggestion_threshold,
                learning_rate = excluded.learning_rate,
                target_success_rate = excluded.target_success_rate,
                window_size = excluded.window_size,
                min_threshold = excluded.min_threshold,
                max_threshold = excluded.max_threshold",
        )
        .bind(state.explicit_threshold)
        .bind(state.suggestion_threshold)
        .bind(state.learning_rate)
        .bind(state.target_success_rate)
        .bind(state.window_size as i64)
        .bind(state.min_threshold)
        .bind(state.max_threshold)
        .execute(pool)
        .await?;
        Ok(())
    }
}
