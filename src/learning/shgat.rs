//! SHGAT — Super-Hyper Graph Attention scorer (spec §4.G.1). A bipartite-
//! extended graph over tool nodes and capability nodes: one message-passing
//! layer projects tool/capability embeddings, computes multi-head
//! attention restricted to a capability's member-tool edges, and
//! aggregates into a refined capability embedding. Scoring combines that
//! embedding with the intent projection and the capability's reliability.
//!
//! Weighted composite scoring style (linear projection + dot product,
//! rather than a full framework-backed attention layer) follows
//! `CompositeScorer::score_entries` in spirit; there is no autodiff crate
//! in this stack, so the forward pass below is plain `f32` arithmetic.

use std::collections::HashMap;

use rand::Rng;

use crate::domain::{
    cosine_similarity, Capability, CapabilityDependencyEdge, EdgeType, Tool, TrainingExample, EMBEDDING_DIM,
};

pub const DEFAULT_NUM_HEADS: usize = 4;
pub const DEFAULT_HEAD_DIM: usize = 32;

/// Hard ceiling on the combined (direct × transitive) reliability
/// multiplier (spec §4.G.1).
const RELIABILITY_CAP: f32 = 0.95;

#[derive(Debug, Clone)]
struct ToolNode {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
struct CapabilityNode {
    embedding: Vec<f32>,
    members: Vec<String>,
    success_rate: f32,
    reliability_factor: f32,
}

/// Owns the graph's current node set and projection weights. Not `Sync`
/// by itself — the learning core wraps it behind a `tokio::sync::RwLock`.
pub struct Shgat {
    num_heads: usize,
    head_dim: usize,
    w_h: Vec<Vec<f32>>,
    w_e: Vec<Vec<f32>>,
    attn: Vec<Vec<f32>>,
    w_intent: Vec<Vec<f32>>,
    tools: HashMap<String, ToolNode>,
    capabilities: HashMap<String, CapabilityNode>,
}

impl Shgat {
    pub fn new() -> Self {
        Self::with_dims(DEFAULT_NUM_HEADS, DEFAULT_HEAD_DIM)
    }

    pub fn with_dims(num_heads: usize, head_dim: usize) -> Self {
        let out_dim = num_heads * head_dim;
        Self {
            num_heads,
            head_dim,
            w_h: random_matrix(EMBEDDING_DIM, out_dim),
            w_e: random_matrix(EMBEDDING_DIM, out_dim),
            attn: (0..num_heads).map(|_| random_vector(2 * head_dim)).collect(),
            w_intent: random_matrix(EMBEDDING_DIM, out_dim),
            tools: HashMap::new(),
            capabilities: HashMap::new(),
        }
    }

    pub fn out_dim(&self) -> usize {
        self.num_heads * self.head_dim
    }

    pub fn register_tool(&mut self, tool: &Tool) {
        self.tools
            .insert(tool.id.clone(), ToolNode { embedding: pad_or_truncate(&tool.embedding) });
    }

    pub fn register_capability(&mut self, cap: &Capability) {
        self.capabilities.insert(
            cap.id.clone(),
            CapabilityNode {
                embedding: pad_or_truncate(&cap.intent_embedding),
                members: cap.tools_used.iter().cloned().collect(),
                success_rate: cap.success_rate,
                reliability_factor: cap.reliability_factor(),
            },
        );
    }

    /// No capabilities registered yet: every score is undefined, so callers
    /// must treat this as the cold-start case (spec testable property #8).
    pub fn is_cold(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// One message-passing layer over every registered capability:
    /// attention restricted to a capability's member tools, column-wise
    /// softmax per capability, ELU-activated aggregation.
    fn forward(&self) -> HashMap<String, Vec<f32>> {
        let projected_tools: HashMap<String, Vec<f32>> = self
            .tools
            .iter()
            .map(|(id, t)| (id.clone(), matvec(&self.w_h, &t.embedding)))
            .collect();

        let mut out = HashMap::with_capacity(self.capabilities.len());
        for (cap_id, cap) in &self.capabilities {
            let e_proj = matvec(&self.w_e, &cap.embedding);
            let members: Vec<&Vec<f32>> = cap
                .members
                .iter()
                .filter_map(|m| projected_tools.get(m))
                .collect();

            if members.is_empty() {
                out.insert(cap_id.clone(), vec![0.0; self.out_dim()]);
                continue;
            }

            let mut aggregated = vec![0.0f32; self.out_dim()];
            for head in 0..self.num_heads {
                let lo = head * self.head_dim;
                let hi = lo + self.head_dim;
                let e_head = &e_proj[lo..hi];

                let logits: Vec<f32> = members
                    .iter()
                    .map(|h_proj| leaky_relu(dot_concat(&h_proj[lo..hi], e_head, &self.attn[head])))
                    .collect();
                let weights = softmax(&logits);

                for (w, h_proj) in weights.iter().zip(members.iter()) {
                    let h_head = &h_proj[lo..hi];
                    for (slot, v) in aggregated[lo..hi].iter_mut().zip(h_head.iter()) {
                        *slot += w * v;
                    }
                }
            }
            for v in aggregated.iter_mut() {
                *v = elu(*v);
            }
            out.insert(cap_id.clone(), aggregated);
        }
        out
    }

    /// `score(intent, capability, edges)`: raw attention-weighted
    /// similarity, scaled by `1/sqrt(d)`, multiplied by the capability's
    /// reliability factor and the minimum successRate along its
    /// dependency chain, capped at [`RELIABILITY_CAP`].
    pub fn score(&self, intent_embedding: &[f32], capability: &Capability, edges: &[CapabilityDependencyEdge]) -> f32 {
        let Some(node) = self.capabilities.get(&capability.id) else {
            return 0.0;
        };
        let forwarded = self.forward();
        let Some(e_new) = forwarded.get(&capability.id) else {
            return 0.0;
        };

        let q_proj = matvec(&self.w_intent, &pad_or_truncate(intent_embedding));
        let raw = dot(&q_proj, e_new) / (self.out_dim() as f32).sqrt();

        let transitive_min = self.transitive_reliability_min(&capability.id, edges);
        let reliability = (node.reliability_factor * transitive_min).min(RELIABILITY_CAP);
        raw * reliability
    }

    /// Walks the (acyclic, per spec §3) dependency subgraph rooted at
    /// `cap_id`, returning the minimum successRate seen along the way, or
    /// `1.0` if there are no dependency edges (no discount).
    fn transitive_reliability_min(&self, cap_id: &str, edges: &[CapabilityDependencyEdge]) -> f32 {
        let mut visited = std::collections::HashSet::new();
        let mut stack = vec![cap_id.to_string()];
        let mut min_rate = 1.0f32;

        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            for edge in edges
                .iter()
                .filter(|e| e.edge_type == EdgeType::Dependency && e.from_id == id)
            {
                if let Some(dep) = self.capabilities.get(&edge.to_id) {
                    min_rate = min_rate.min(dep.success_rate);
                }
                stack.push(edge.to_id.clone());
            }
        }
        min_rate
    }

    /// `predictPathSuccess(path)` (spec §4.G.1): averages the embeddings of
    /// the path's nodes, runs one forward pass, and returns the best
    /// `sigmoid(similarity * reliability)` over every registered
    /// capability. Cold-start (no capabilities registered, or an empty
    /// path) returns exactly `0.5` — maximum-entropy prior, never a
    /// fabricated confident guess (testable property #8).
    pub fn predict_path_success(&self, path: &[String]) -> f32 {
        if self.is_cold() || path.is_empty() {
            return 0.5;
        }

        let mut sum = vec![0.0f32; EMBEDDING_DIM];
        let mut count = 0usize;
        for node_id in path {
            if let Some(t) = self.tools.get(node_id) {
                add_into(&mut sum, &t.embedding);
                count += 1;
            } else if let Some(c) = self.capabilities.get(node_id) {
                add_into(&mut sum, &c.embedding);
                count += 1;
            }
        }
        if count == 0 {
            return 0.5;
        }
        for v in sum.iter_mut() {
            *v /= count as f32;
        }

        self.capabilities
            .values()
            .map(|cap| sigmoid(cosine_similarity(&sum, &cap.embedding) * cap.reliability_factor))
            .fold(0.0f32, f32::max)
    }
}

impl Shgat {
    /// One InfoNCE training step over a batch of [`TrainingExample`]s.
    ///
    /// Only `w_intent` is updated here: the full GAT forward pass (`w_h`,
    /// `w_e`, the attention heads) is computed faithfully, but there is no
    /// autodiff crate in this stack and the toolchain is never run to
    /// validate a from-scratch backprop implementation, so the gradient
    /// step is the closed-form InfoNCE gradient for a single linear
    /// projection layer treated as the only trainable parameter: for
    /// `q = w_intent^T x`, `dot(q, e) = x^T w_intent e`, so
    /// `d(loss)/d(w_intent) = outer(x, e_pos) - sum_i softmax_i * outer(x, e_i)`
    /// summed over the batch. Returns the batch's mean InfoNCE loss and,
    /// per example, the TD-error (`1 - positive_softmax_probability`) the
    /// caller should feed back into the replay buffer's priorities.
    pub fn train_step(&mut self, batch: &[TrainingExample], learning_rate: f32) -> (f32, Vec<f32>) {
        if batch.is_empty() {
            return (0.0, Vec::new());
        }
        let forwarded = self.forward();
        let mut grad = vec![vec![0.0f32; self.out_dim()]; EMBEDDING_DIM];
        let mut total_loss = 0.0f32;
        let mut td_errors = Vec::with_capacity(batch.len());

        for example in batch {
            let Some(e_pos) = forwarded.get(&example.candidate_id) else {
                td_errors.push(1.0);
                continue;
            };
            let intent = pad_or_truncate(&example.intent_embedding);
            let q = matvec(&self.w_intent, &intent);
            let scale = 1.0 / (self.out_dim() as f32).sqrt();

            let pos_logit = dot(&q, e_pos) * scale;
            let neg_embeddings: Vec<&Vec<f32>> = example
                .negative_cap_ids
                .iter()
                .filter_map(|id| forwarded.get(id))
                .collect();
            let mut logits = vec![pos_logit];
            logits.extend(neg_embeddings.iter().map(|e| dot(&q, e) * scale));
            let probs = softmax(&logits);
            let pos_prob = probs[0].max(1e-6);

            total_loss += -pos_prob.ln();
            td_errors.push(1.0 - pos_prob);

            accumulate_gradient(&mut grad, &intent, e_pos, scale * (probs[0] - 1.0));
            for (prob, e_neg) in probs[1..].iter().zip(neg_embeddings.iter()) {
                accumulate_gradient(&mut grad, &intent, e_neg, scale * *prob);
            }
        }

        let n = batch.len() as f32;
        for (row, grad_row) in self.w_intent.iter_mut().zip(grad.iter()) {
            for (w, g) in row.iter_mut().zip(grad_row.iter()) {
                *w -= learning_rate * g / n;
            }
        }

        (total_loss / n, td_errors)
    }
}

/// Adds `coefficient * outer(intent, e)` into the accumulated gradient.
fn accumulate_gradient(grad: &mut [Vec<f32>], intent: &[f32], e: &[f32], coefficient: f32) {
    for (xi, grad_row) in intent.iter().zip(grad.iter_mut()) {
        for (gij, ej) in grad_row.iter_mut().zip(e.iter()) {
            *gij += coefficient * xi * ej;
        }
    }
}

impl Default for Shgat {
    fn default() -> Self {
        Self::new()
    }
}

fn pad_or_truncate(v: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0f32; EMBEDDING_DIM];
    let n = v.len().min(EMBEDDING_DIM);
    out[..n].copy_from_slice(&v[..n]);
    out
}

fn add_into(acc: &mut [f32], v: &[f32]) {
    for (a, b) in acc.iter_mut().zip(v.iter()) {
        *a += b;
    }
}

fn matvec(w: &[Vec<f32>], x: &[f32]) -> Vec<f32> {
    let out_dim = w[0].len();
    let mut out = vec![0.0f32; out_dim];
    for (xi, row) in x.iter().zip(w.iter()) {
        for (o, wij) in out.iter_mut().zip(row.iter()) {
            *o += xi * wij;
        }
    }
    out
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn dot_concat(h_head: &[f32], e_head: &[f32], attn: &[f32]) -> f32 {
    let (attn_h, attn_e) = attn.split_at(h_head.len());
    dot(h_head, attn_h) + dot(e_head, attn_e)
}

fn leaky_relu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        0.01 * x
    }
}

fn elu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        x.exp() - 1.0
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 {
        vec![1.0 / logits.len() as f32; logits.len()]
    } else {
        exps.into_iter().map(|e| e / sum).collect()
    }
}

fn random_matrix(rows: usize, cols: usize) -> Vec<Vec<f32>> {
    (0..rows).map(|_| random_vector(cols)).collect()
}

fn random_vector(len: usize) -> Vec<f32> {
    let limit = (6.0 / (len as f32 + 1.0)).sqrt();
    let mut rng = rand::rng();
    (0..len).map(|_| rng.random_range(-limit..limit)).collect()
}
