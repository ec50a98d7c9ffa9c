use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Controls acceptance of a SHGAT-scored capability (spec §3, §4.G.3).
/// Both thresholds are clamped to `[min_threshold, max_threshold]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveThresholdState {
    pub explicit_threshold: f32,
    pub suggestion_threshold: f32,
    #[serde(skip)]
    pub windowed_history: VecDeque<bool>,
    pub learning_rate: f32,
    pub target_success_rate: f32,
    pub window_size: usize,
    pub min_threshold: f32,
    pub max_threshold: f32,
}

impl Default for AdaptiveThresholdState {
    fn default() -> Self {
        Self {
            explicit_threshold: 0.70,
            suggestion_threshold: 0.70,
            windowed_history: VecDeque::new(),
            learning_rate: 0.05,
            target_success_rate: 0.85,
            window_size: 50,
            min_threshold: 0.40,
            max_threshold: 0.90,
        }
    }
}

impl AdaptiveThresholdState {
    pub fn demo_mode() -> Self {
        Self {
            window_size: 10,
            ..Self::default()
        }
    }

    /// Record one execution outcome; once a full window has accumulated,
    /// recompute and EMA-smooth both thresholds, then clear the window.
    pub fn record_outcome(&mut self, success: bool) {
        self.windowed_history.push_back(success);
        if self.windowed_history.len() < self.window_size {
            return;
        }
        let s = self.windowed_history.iter().filter(|x| **x).count() as f32
            / self.windowed_history.len() as f32;
        self.windowed_history.clear();

        let candidate = self.candidate_threshold(self.suggestion_threshold, s);
        self.suggestion_threshold = self.ema(self.suggestion_threshold, candidate);
        let candidate = self.candidate_threshold(self.explicit_threshold, s);
        self.explicit_threshold = self.ema(self.explicit_threshold, candidate);
    }

    fn candidate_threshold(&self, current: f32, window_success_rate: f32) -> f32 {
        let s_star = self.target_success_rate;
        if window_success_rate > 0.90 {
            current - (window_success_rate - s_star) * 0.1
        } else if window_success_rate < 0.80 {
            current + (s_star - window_success_rate) * 0.1
        } else {
            current
        }
    }

    fn ema(&self, current: f32, candidate: f32) -> f32 {
        let blended = current * (1.0 - self.learning_rate) + candidate * self.learning_rate;
        blended.clamp(self.min_threshold, self.max_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S6: sustained 70% success with window_size=10 should push the
    /// suggestion threshold up from 0.70 (below-target success pulls the
    /// candidate threshold higher each window; EMA moves it monotonically
    /// in that direction every full window).
    #[test]
    fn adaptive_threshold_rises_under_sustained_below_target_success() {
        let mut state = AdaptiveThresholdState {
            window_size: 10,
            ..AdaptiveThresholdState::default()
        };
        assert_eq!(state.suggestion_threshold, 0.70);

        let mut last = state.suggestion_threshold;
        for _ in 0..6 {
            for i in 0..10 {
                state.record_outcome(i < 7); // 70% success each window
            }
            assert!(state.suggestion_threshold > last);
            last = state.suggestion_threshold;
        }
        assert!(state.suggestion_threshold < state.max_threshold);
    }

    #[test]
    fn thresholds_never_leave_clamp_range() {
        let mut state = AdaptiveThresholdState::default();
        for _ in 0..200 {
            for i in 0..state.window_size {
                state.record_outcome(i % 5 != 0); // 80% success
            }
        }
        assert!(state.suggestion_threshold >= state.min_threshold);
        assert!(state.suggestion_threshold <= state.max_threshold);
    }

    #[test]
    fn high_success_rate_lowers_threshold() {
        let mut state = AdaptiveThresholdState::default();
        let before = state.suggestion_threshold;
        for _ in 0..state.window_size {
            state.record_outcome(true); // 100% success > 0.90
        }
        assert!(state.suggestion_threshold < before);
    }
}
