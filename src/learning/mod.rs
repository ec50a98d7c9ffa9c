//! Learning core (spec §4.G): the SHGAT attention scorer, the
//! prioritized-replay training loop feeding it, and the adaptive
//! acceptance-threshold controller it is measured against. All three are
//! owned by one [`LearningCore`] so the loader only ever touches a single
//! handle, matching [`crate::PmlContext`]'s no-ambient-singletons shape.

mod per;
mod shgat;
mod thresholds;

pub use per::{ReplayBuffer, SampledExample};
pub use shgat::Shgat;
pub use thresholds::ThresholdController;

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::domain::{Capability, CapabilityDependencyEdge, Tool, TrainingExample};
use crate::error::PmlResult;

const DEFAULT_REPLAY_CAPACITY: usize = 10_000;
const DEFAULT_TRAIN_BATCH: usize = 32;
const DEFAULT_LEARNING_RATE: f32 = 0.01;

pub struct LearningConfig {
    pub replay_capacity: usize,
    pub train_batch_size: usize,
    pub learning_rate: f32,
    pub use_per: bool,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            train_batch_size: DEFAULT_TRAIN_BATCH,
            learning_rate: DEFAULT_LEARNING_RATE,
            use_per: true,
        }
    }
}

pub struct LearningCore {
    shgat: RwLock<Shgat>,
    replay: RwLock<ReplayBuffer>,
    pub thresholds: ThresholdController,
    train_batch_size: usize,
    learning_rate: f32,
}

impl LearningCore {
    pub async fn new(db: SqlitePool, config: LearningConfig) -> PmlResult<Self> {
        Ok(Self {
            shgat: RwLock::new(Shgat::new()),
            replay: RwLock::new(ReplayBuffer::new(config.replay_capacity, config.use_per)),
            thresholds: ThresholdController::load(db).await?,
            train_batch_size: config.train_batch_size,
            learning_rate: config.learning_rate,
        })
    }

    pub async fn register_tool(&self, tool: &Tool) {
        self.shgat.write().await.register_tool(tool);
    }

    pub async fn register_capability(&self, capability: &Capability) {
        self.shgat.write().await.register_capability(capability);
    }

    /// `score(intent, capability, edges)` (spec §4.G.1), the loader's sole
    /// entry point for ranking a candidate capability against an intent.
    pub async fn score(
        &self,
        intent_embedding: &[f32],
        capability: &Capability,
        edges: &[CapabilityDependencyEdge],
    ) -> f32 {
        self.shgat.read().await.score(intent_embedding, capability, edges)
    }

    /// `predictPathSuccess(path)` (spec §4.G.1). Cold-start (no
    /// capabilities registered yet) returns exactly `0.5`.
    pub async fn predict_path_success(&self, path: &[String]) -> f32 {
        self.shgat.read().await.predict_path_success(path)
    }

    /// Queues a finished execution's derived example for future training
    /// (spec §4.G.2). Priority starts at max until the next training pass
    /// establishes a real TD-error for it.
    pub async fn record_example(&self, example: TrainingExample) {
        self.replay.write().await.push(example, None);
    }

    /// Draws one batch from the replay buffer and runs one InfoNCE
    /// training step against it, feeding the resulting TD-errors back as
    /// updated priorities. Returns `None` if the buffer has nothing to
    /// train on yet.
    pub async fn train_once(&self) -> Option<f32> {
        let sampled = {
            let mut replay = self.replay.write().await;
            replay.sample(self.train_batch_size)
        };
        if sampled.is_empty() {
            return None;
        }

        let examples: Vec<TrainingExample> = sampled.iter().map(|s| s.example.clone()).collect();
        let (loss, td_errors) = {
            let mut shgat = self.shgat.write().await;
            shgat.train_step(&examples, self.learning_rate)
        };

        let mut replay = self.replay.write().await;
        for (sample, td_error) in sampled.iter().zip(td_errors.iter()) {
            replay.update_priority(sample.tree_index, *td_error);
        }
        Some(loss)
    }

    pub async fn is_cold(&self) -> bool {
        self.shgat.read().await.is_cold()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EMBEDDING_DIM;
    use std::collections::HashSet;

    async fn core() -> LearningCore {
        let pool = crate::db::connect("sqlite::memory:", 1).await.unwrap();
        LearningCore::new(pool, LearningConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn cold_start_predicts_half_before_anything_is_registered() {
        let core = core().await;
        assert!(core.is_cold().await);
        assert_eq!(core.predict_path_success(&["x".to_string()]).await, 0.5);
    }

    #[tokio::test]
    async fn training_with_nothing_queued_is_a_clean_noop() {
        let core = core().await;
        assert!(core.train_once().await.is_none());
    }

    #[tokio::test]
    async fn a_full_cycle_registers_scores_and_trains() {
        let core = core().await;
        let tool = Tool {
            id: "fs:read".to_string(),
            fqdn: "pml.mcp.fs.read".to_string(),
            input_schema: serde_json::json!({}),
            embedding: vec![0.2; EMBEDDING_DIM],
        };
        core.register_tool(&tool).await;

        let cap = Capability {
            id: "cap1".to_string(),
            fqdn: "pml.mcp.demo".to_string(),
            kind: "deno".to_string(),
            intent: "demo".to_string(),
            intent_embedding: vec![0.3; EMBEDDING_DIM],
            code_hash: "sha256-x".to_string(),
            code: "return 1;".to_string(),
            tools_used: HashSet::from(["fs:read".to_string()]),
            usage_count: 1,
            success_rate: 0.9,
            success_count: 1,
            failure_count: 0,
        };
        core.register_capability(&cap).await;
        assert!(!core.is_cold().await);

        let score = core.score(&vec![0.3; EMBEDDING_DIM], &cap, &[]).await;
        assert!(score.is_finite());

        core.record_example(TrainingExample {
            intent_embedding: vec![0.3; EMBEDDING_DIM],
            candidate_id: "cap1".to_string(),
            negative_cap_ids: vec![],
            all_negatives_sorted: vec![],
            outcome: true,
            context_tools: vec!["fs:read".to_string()],
        })
        .await;
        let loss = core.train_once().await;
        assert!(loss.is_some());
    }
}
