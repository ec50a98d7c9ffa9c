use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A stored procedure (spec §3). `codeHash` and `code` are one-to-one:
/// two capabilities with equal `codeHash` are the same capability,
/// deduplicated on save (testable property #3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub fqdn: String,
    /// Always `deno`-class code per spec §3.
    pub kind: String,
    pub intent: String,
    pub intent_embedding: Vec<f32>,
    /// Content-addressed SHA-256 of `code`.
    pub code_hash: String,
    pub code: String,
    pub tools_used: HashSet<String>,
    pub usage_count: u64,
    pub success_rate: f32,
    pub success_count: u64,
    pub failure_count: u64,
}

impl Capability {
    /// Reliability factor multiplying a SHGAT score (spec §4.G.1).
    pub fn reliability_factor(&self) -> f32 {
        if self.success_rate < 0.5 {
            0.1
        } else if self.success_rate > 0.9 {
            1.2
        } else {
            1.0
        }
    }

    pub fn record_outcome(&mut self, success: bool) {
        self.usage_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.success_rate = if self.usage_count == 0 {
            0.0
        } else {
            self.success_count as f32 / self.usage_count as f32
        };
    }
}

/// Directed edge between capabilities (spec §3). The subgraph restricted to
/// `EdgeType::Dependency` must be acyclic; `Alternative` edges may cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Dependency,
    Contains,
    Sequence,
    Alternative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDependencyEdge {
    pub from_id: String,
    pub to_id: String,
    pub edge_type: EdgeType,
    pub confidence: f32,
    pub observed_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(success_rate: f32) -> Capability {
        Capability {
            id: "cap1".into(),
            fqdn: "pml.mcp.json.parse".into(),
            kind: "deno".into(),
            intent: "parse json".into(),
            intent_embedding: vec![0.1; 8],
            code_hash: "sha256-abc".into(),
            code: "return JSON.parse(args.input);".into(),
            tools_used: HashSet::new(),
            usage_count: 10,
            success_rate,
            success_count: 0,
            failure_count: 0,
        }
    }

    #[test]
    fn reliability_factor_thresholds() {
        assert_eq!(cap(0.3).reliability_factor(), 0.1);
        assert_eq!(cap(0.7).reliability_factor(), 1.0);
        assert_eq!(cap(0.95).reliability_factor(), 1.2);
    }

    #[test]
    fn record_outcome_updates_rolling_rate() {
        let mut c = cap(0.0);
        c.usage_count = 0;
        c.success_count = 0;
        c.failure_count = 0;
        c.record_outcome(true);
        c.record_outcome(true);
        c.record_outcome(false);
        assert_eq!(c.usage_count, 3);
        assert!((c.success_rate - (2.0 / 3.0)).abs() < 1e-6);
    }
}
