//! Thin persistence wrapper around [`AdaptiveThresholdState`] (spec
//! §4.G.3): loads the single persisted row at startup, records outcomes in
//! memory, and writes back whenever a window closes. `windowed_history`
//! itself is never persisted (Open Question (ii): a restart starts a
//! fresh observation window rather than replaying partial history).

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::db;
use crate::domain::AdaptiveThresholdState;
use crate::error::PmlResult;

pub struct ThresholdController {
    db: SqlitePool,
    state: RwLock<AdaptiveThresholdState>,
}

impl ThresholdController {
    pub async fn load(db: SqlitePool) -> PmlResult<Self> {
        let state = db::threshold::load(&db).await?.unwrap_or_default();
        Ok(Self {
            db,
            state: RwLock::new(state),
        })
    }

    pub async fn explicit_threshold(&self) -> f32 {
        self.state.read().await.explicit_threshold
    }

    pub async fn suggestion_threshold(&self) -> f32 {
        self.state.read().await.suggestion_threshold
    }

    /// Records one outcome; if doing so closed an observation window (and
    /// therefore changed the thresholds), persists the new state.
    pub async fn record_outcome(&self, success: bool) -> PmlResult<()> {
        let mut guard = self.state.write().await;
        let before = (guard.explicit_threshold, guard.suggestion_threshold);
        guard.record_outcome(success);
        let changed = before != (guard.explicit_threshold, guard.suggestion_threshold);
        if changed {
            db::threshold::save(&self.db, &guard).await?;
        }
        Ok(())
    }
}
