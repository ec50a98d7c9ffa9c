//! Core data model (spec §3): tools, capabilities, dependency edges,
//! lockfile entries, execution traces, training examples, SHGAT nodes,
//! and adaptive threshold state.

mod capability;
mod threshold;
mod tool;
mod trace;

pub use capability::{Capability, CapabilityDependencyEdge, EdgeType};
pub use threshold::AdaptiveThresholdState;
pub use tool::Tool;
pub use trace::{Decision, ExecutionTrace, TaskResult, TrainingExample};

use serde::{Deserialize, Serialize};

/// Default embedding dimensionality (spec §3): fixed-length, unit-normalized.
pub const EMBEDDING_DIM: usize = 1024;

/// Pinned integrity record for a fetched procedure (spec §4.D).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockfileEntry {
    pub fqdn: String,
    pub integrity: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub approved: bool,
}

/// The four flavors of human-in-the-loop approval pause (spec §4.E, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    Integrity,
    ToolPermission,
    Dependency,
    ApiKeyRequired,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalType::Integrity => "integrity",
            ApprovalType::ToolPermission => "tool_permission",
            ApprovalType::Dependency => "dependency",
            ApprovalType::ApiKeyRequired => "api_key_required",
        }
    }
}

/// Cosine similarity between two equal-length embeddings. Returns `0.0` for
/// mismatched lengths or zero-norm vectors (mirrors the teacher's
/// `CompositeScorer::cosine_similarity`).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![0.5_f32, 0.5, 0.5, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![0.0_f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_len_is_zero() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![0.0_f32];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
