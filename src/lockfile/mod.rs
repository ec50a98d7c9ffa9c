//! Lockfile + Integrity Checker: persists approved integrity hashes per
//! FQDN and gates future fetches against drift.

use sqlx::SqlitePool;

use crate::db;
use crate::domain::LockfileEntry;
use crate::error::PmlResult;

/// Result of checking a freshly fetched procedure's integrity against the
/// stored lockfile entry.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityVerdict {
    /// No prior entry; `auto_approve` decided the outcome.
    FirstFetchApproved,
    FirstFetchNeedsApproval,
    /// Matches the stored hash.
    Unchanged,
    /// Stored hash differs from what was just fetched.
    Drifted { old_hash: String, new_hash: String },
}

pub struct LockfileChecker {
    pool: SqlitePool,
    /// Whether a never-before-seen FQDN auto-approves on first fetch.
    auto_approve_first_fetch: bool,
}

impl LockfileChecker {
    pub fn new(pool: SqlitePool, auto_approve_first_fetch: bool) -> Self {
        Self {
            pool,
            auto_approve_first_fetch,
        }
    }

    pub async fn check(&self, fqdn: &str, fetched_integrity: &str, kind: &str) -> PmlResult<IntegrityVerdict> {
        match db::lockfile::get(&self.pool, fqdn).await? {
            None => {
                if self.auto_approve_first_fetch {
                    self.record(fqdn, fetched_integrity, kind, true).await?;
                    Ok(IntegrityVerdict::FirstFetchApproved)
                } else {
                    Ok(IntegrityVerdict::FirstFetchNeedsApproval)
                }
            }
            Some(entry) if entry.integrity == fetched_integrity => Ok(IntegrityVerdict::Unchanged),
            Some(entry) => Ok(IntegrityVerdict::Drifted {
                old_hash: entry.integrity,
                new_hash: fetched_integrity.to_string(),
            }),
        }
    }

    /// Approval updates `integrity` to the new hash and sets `approved =
    /// true`. Rejection leaves the old hash untouched — callers must not
    /// call this on rejection.
    pub async fn record(&self, fqdn: &str, integrity: &str, kind: &str, approved: bool) -> PmlResult<()> {
        db::lockfile::upsert(
            &self.pool,
            &LockfileEntry {
                fqdn: fqdn.to_string(),
                integrity: integrity.to_string(),
                kind: kind.to_string(),
                approved,
            },
        )
        .await
    }
}
