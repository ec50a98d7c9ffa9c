//! Prioritized Experience Replay (spec §4.G.2): a binary sum tree gives
//! O(log n) priority-weighted sampling so SHGAT's InfoNCE training step
//! oversamples surprising (high TD-error) examples instead of drawing
//! uniformly. Falls back to uniform sampling when `use_per` is off,
//! matching `LearningConfig.use_per`.

use rand::Rng;

use crate::domain::TrainingExample;

const PRIORITY_EPSILON: f32 = 0.01;
const PRIORITY_CAP: f32 = 25.0;
const DEFAULT_ALPHA: f32 = 0.6;
const BETA_START: f32 = 0.4;
const BETA_END: f32 = 1.0;
/// Number of `sample` calls over which beta anneals from start to end.
const BETA_ANNEAL_STEPS: u32 = 10_000;

/// Array-backed binary sum tree over a fixed-capacity leaf ring buffer.
/// Leaves occupy the back half of `tree`; internal nodes hold the sum of
/// their children (classic PER implementation, e.g. OpenAI baselines).
struct SumTree {
    capacity: usize,
    tree: Vec<f32>,
    write_cursor: usize,
    size: usize,
}

impl SumTree {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tree: vec![0.0; 2 * capacity],
            write_cursor: 0,
            size: 0,
        }
    }

    fn add(&mut self, priority: f32) -> usize {
        let leaf = self.write_cursor + self.capacity;
        self.update(leaf, priority);
        let inserted_at = self.write_cursor;
        self.write_cursor = (self.write_cursor + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        inserted_at
    }

    fn update(&mut self, tree_index: usize, priority: f32) {
        let mut idx = tree_index;
        let delta = priority - self.tree[idx];
        self.tree[idx] = priority;
        while idx > 0 {
            idx = (idx - 1) / 2;
            self.tree[idx] += delta;
        }
    }

    fn total(&self) -> f32 {
        self.tree[0]
    }

    /// Descends from the root following the cumulative-sum cursor `value`
    /// (`0 <= value < total()`), returning the matching leaf's tree index.
    fn retrieve(&self, value: f32) -> usize {
        let mut idx = 0;
        let mut v = value;
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            if left >= self.tree.len() {
                return idx;
            }
            if v <= self.tree[left] {
                idx = left;
            } else {
                v -= self.tree[left];
                idx = right;
            }
        }
    }

    fn priority_at(&self, tree_index: usize) -> f32 {
        self.tree[tree_index]
    }
}

pub struct SampledExample {
    pub tree_index: usize,
    pub example: TrainingExample,
    pub priority: f32,
    pub is_weight: f32,
}

/// Prioritized (or uniform, if `use_per` is false) replay buffer over
/// [`TrainingExample`]s.
pub struct ReplayBuffer {
    capacity: usize,
    use_per: bool,
    alpha: f32,
    beta: f32,
    sample_calls: u32,
    tree: SumTree,
    examples: Vec<Option<TrainingExample>>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, use_per: bool) -> Self {
        Self {
            capacity,
            use_per,
            alpha: DEFAULT_ALPHA,
            beta: BETA_START,
            sample_calls: 0,
            tree: SumTree::new(capacity),
            examples: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `priority = min((|td_error| + eps)^alpha, cap)`. A fresh example
    /// with no known TD-error yet (`td_error == None`) gets max priority,
    /// so it is guaranteed to be sampled at least once before its error is
    /// known (standard PER cold-insert behavior).
    pub fn push(&mut self, example: TrainingExample, td_error: Option<f32>) {
        let priority = match td_error {
            Some(err) => (err.abs() + PRIORITY_EPSILON).min(PRIORITY_CAP).powf(self.alpha),
            None => PRIORITY_CAP.powf(self.alpha),
        };
        let leaf = self.tree.add(priority);
        self.examples[leaf % self.capacity] = Some(example);
    }

    /// Updates a previously sampled example's priority once its true
    /// TD-error is known (post-training-step feedback loop).
    pub fn update_priority(&mut self, tree_index: usize, td_error: f32) {
        let priority = (td_error.abs() + PRIORITY_EPSILON).min(PRIORITY_CAP).powf(self.alpha);
        self.tree.update(tree_index, priority);
    }

    /// Draws `batch_size` examples (with replacement across stratified
    /// priority-mass segments when `use_per`, uniformly otherwise), each
    /// carrying an importance-sampling weight that corrects for the bias
    /// priority sampling introduces.
    pub fn sample(&mut self, batch_size: usize) -> Vec<SampledExample> {
        if self.is_empty() || batch_size == 0 {
            return Vec::new();
        }
        self.sample_calls += 1;
        self.beta = (BETA_START
            + (BETA_END - BETA_START) * (self.sample_calls as f32 / BETA_ANNEAL_STEPS as f32))
            .min(BETA_END);

        if !self.use_per {
            return self.sample_uniform(batch_size);
        }

        let total = self.tree.total();
        if total <= 0.0 {
            return self.sample_uniform(batch_size);
        }

        let mut rng = rand::rng();
        let segment = total / batch_size as f32;
        let min_priority = self.min_leaf_priority().max(f32::MIN_POSITIVE);
        let max_weight = (min_priority / total * self.len() as f32).powf(-self.beta);

        let mut out = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let lo = segment * i as f32;
            let hi = segment * (i + 1) as f32;
            let value = rng.random_range(lo..hi.max(lo + f32::MIN_POSITIVE));
            let tree_index = self.tree.retrieve(value);
            let priority = self.tree.priority_at(tree_index);
            let leaf_slot = tree_index - self.tree.capacity;
            let Some(example) = self.examples[leaf_slot].clone() else {
                continue;
            };
            let sample_prob = priority / total;
            let is_weight = (sample_prob * self.len() as f32).powf(-self.beta) / max_weight;
            out.push(SampledExample {
                tree_index,
                example,
                priority,
                is_weight,
            });
        }
        out
    }

    fn sample_uniform(&self, batch_size: usize) -> Vec<SampledExample> {
        let mut rng = rand::rng();
        let mut out = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            let leaf_slot = rng.random_range(0..self.len());
            if let Some(example) = self.examples[leaf_slot].clone() {
                out.push(SampledExample {
                    tree_index: leaf_slot + self.tree.capacity,
                    example,
                    priority: 1.0,
                    is_weight: 1.0,
                });
            }
        }
        out
    }

    fn min_leaf_priority(&self) -> f32 {
        self.tree.tree[self.tree.capacity..self.tree.capacity + self.len()]
            .iter()
            .cloned()
            .filter(|p| *p > 0.0)
            .fold(f32::MAX, f32::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(id: &str) -> TrainingExample {
        TrainingExample {
            intent_embedding: vec![0.1; 8],
            candidate_id: id.to_string(),
            negative_cap_ids: vec!["neg1".to_string()],
            all_negatives_sorted: vec!["neg1".to_string()],
            outcome: true,
            context_tools: vec![],
        }
    }

    #[test]
    fn priorities_are_always_strictly_positive() {
        let mut buf = ReplayBuffer::new(8, true);
        buf.push(example("a"), Some(0.0));
        let sampled = buf.sample(1);
        assert_eq!(sampled.len(), 1);
        assert!(sampled[0].priority > 0.0);
    }

    #[test]
    fn sampling_an_empty_buffer_returns_nothing() {
        let mut buf = ReplayBuffer::new(8, true);
        assert!(buf.sample(4).is_empty());
    }

    #[test]
    fn ring_buffer_evicts_oldest_past_capacity() {
        let mut buf = ReplayBuffer::new(2, false);
        buf.push(example("a"), Some(1.0));
        buf.push(example("b"), Some(1.0));
        buf.push(example("c"), Some(1.0));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn uniform_mode_still_produces_valid_weights() {
        let mut buf = ReplayBuffer::new(4, false);
        for i in 0..4 {
            buf.push(example(&format!("ex{i}")), None);
        }
        let sampled = buf.sample(4);
        assert_eq!(sampled.len(), 4);
        assert!(sampled.iter().all(|s| s.is_weight > 0.0));
    }

    #[test]
    fn higher_td_error_yields_higher_priority() {
        let mut buf = ReplayBuffer::new(4, true);
        buf.push(example("low"), Some(0.01));
        buf.push(example("high"), Some(10.0));
        // Priorities must be monotonic in |td_error| post-alpha exponent.
        let low_priority = (0.01f32 + PRIORITY_EPSILON).powf(DEFAULT_ALPHA);
        let high_priority = (10.0f32 + PRIORITY_EPSILON).powf(DEFAULT_ALPHA);
        assert!(high_priority > low_priority);
    }
}
