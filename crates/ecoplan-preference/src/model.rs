//! Exponential moving average of per-action rewards.

use ecoplan_core::{Feedback, Preference, ScoreMap, Verdict};
use serde::{Deserialize, Serialize};

/// Learning rate used when none (or a non-finite one) is configured.
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;
/// Reward for an accepted recommendation.
pub const DEFAULT_ACCEPT_REWARD: f64 = 1.0;
/// Reward for a declined recommendation.
pub const DEFAULT_DECLINE_REWARD: f64 = -0.5;

/// Translates the boolean feedback boundary into numeric rewards.
///
/// The calibration is a caller policy; the model accepts any real reward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardPolicy {
    pub accept: f64,
    pub decline: f64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            accept: DEFAULT_ACCEPT_REWARD,
            decline: DEFAULT_DECLINE_REWARD,
        }
    }
}

impl RewardPolicy {
    #[must_use]
    pub fn reward(&self, verdict: Verdict) -> f64 {
        match verdict {
            Verdict::Accepted => self.accept,
            Verdict::Declined => self.decline,
        }
    }
}

/// Tunables of the preference model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreferenceConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub rewards: RewardPolicy,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            rewards: RewardPolicy::default(),
        }
    }
}

fn default_learning_rate() -> f64 {
    DEFAULT_LEARNING_RATE
}

/// One applied update, as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub action_id: String,
    pub reward: f64,
    pub before: f64,
    pub after: f64,
}

/// Per-action preference scores.
///
/// `update` computes `new = (1 - α) * old + α * reward`, with `old = 0` for
/// ids never seen. Updates to the same id are applied in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceModel {
    learning_rate: f64,
    scores: ScoreMap,
}

impl Default for PreferenceModel {
    fn default() -> Self {
        Self::with_learning_rate(DEFAULT_LEARNING_RATE)
    }
}

impl PreferenceModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty model; `learning_rate` is clamped to `[0.0, 1.0]`.
    #[must_use]
    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self {
            learning_rate: sanitize_learning_rate(learning_rate),
            scores: ScoreMap::new(),
        }
    }

    /// Restores a model from a persisted snapshot.
    #[must_use]
    pub fn from_scores(scores: ScoreMap, learning_rate: f64) -> Self {
        Self {
            learning_rate: sanitize_learning_rate(learning_rate),
            scores,
        }
    }

    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    #[must_use]
    pub fn scores(&self) -> &ScoreMap {
        &self.scores
    }

    #[must_use]
    pub fn score(&self, action_id: &str) -> f64 {
        self.scores.get(action_id).copied().unwrap_or(0.0)
    }

    /// Applies one reward and returns the score before and after.
    pub fn update(&mut self, action_id: &str, reward: f64) -> ScoreChange {
        let alpha = self.learning_rate;
        let entry = self.scores.entry(action_id.to_string()).or_insert(0.0);
        let before = *entry;
        *entry = (1.0 - alpha) * before + alpha * reward;
        ScoreChange {
            action_id: action_id.to_string(),
            reward,
            before,
            after: *entry,
        }
    }

    /// Applies a batch of feedback events in order.
    pub fn apply_feedback(
        &mut self,
        batch: &[Feedback],
        rewards: &RewardPolicy,
    ) -> Vec<ScoreChange> {
        batch
            .iter()
            .map(|fb| self.update(&fb.action_id, rewards.reward(fb.verdict)))
            .collect()
    }
}

impl Preference for PreferenceModel {
    fn score(&self, action_id: &str) -> f64 {
        PreferenceModel::score(self, action_id)
    }

    fn update(&mut self, action_id: &str, reward: f64) {
        PreferenceModel::update(self, action_id, reward);
    }

    fn snapshot(&self) -> ScoreMap {
        self.scores.clone()
    }

    fn load(&mut self, snapshot: ScoreMap) {
        self.scores = snapshot;
    }
}

fn sanitize_learning_rate(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        DEFAULT_LEARNING_RATE
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unseen_actions_score_zero() {
        let model = PreferenceModel::new();
        assert!(model.score("bike").abs() < f64::EPSILON);
        assert!(model.scores().is_empty());
    }

    #[test]
    fn first_update_is_alpha_times_reward() {
        let mut model = PreferenceModel::new();
        let change = model.update("bike", 1.0);
        assert!(change.before.abs() < f64::EPSILON);
        assert!((change.after - 0.1).abs() < 1e-12);
        assert!((model.score("bike") - 0.1).abs() < 1e-12);

        model.update("bike", -0.5);
        // 0.9 * 0.1 + 0.1 * -0.5
        assert!((model.score("bike") - 0.04).abs() < 1e-12);
    }

    #[test]
    fn repeated_acceptance_converges_to_one() {
        let mut model = PreferenceModel::new();
        let mut previous = model.score("led_bulbs");
        for _ in 0..200 {
            model.update("led_bulbs", 1.0);
            let current = model.score("led_bulbs");
            if previous < 1.0 {
                assert!(current > previous, "score must strictly increase");
            }
            assert!(current <= 1.0);
            previous = current;
        }
        assert!((1.0 - previous) < 1e-6);
    }

    #[test]
    fn repeated_decline_converges_to_decline_reward() {
        let mut model = PreferenceModel::new();
        let rewards = RewardPolicy::default();
        let mut previous = 0.0;
        for _ in 0..200 {
            model.apply_feedback(&[Feedback::declined("bike")], &rewards);
            let current = model.score("bike");
            assert!(current <= previous);
            assert!(current >= -0.5);
            previous = current;
        }
        assert!((previous + 0.5).abs() < 1e-6);
    }

    #[test]
    fn updates_for_different_ids_are_independent() {
        let mut model = PreferenceModel::new();
        model.update("bike", 1.0);
        model.update("reduce_beef", -0.5);
        assert!((model.score("bike") - 0.1).abs() < 1e-12);
        assert!((model.score("reduce_beef") + 0.05).abs() < 1e-12);
    }

    #[test]
    fn batch_translates_verdicts_in_order() {
        let mut model = PreferenceModel::new();
        let changes = model.apply_feedback(
            &[
                Feedback::accepted("bike"),
                Feedback::declined("bike"),
                Feedback::accepted("led_bulbs"),
            ],
            &RewardPolicy::default(),
        );
        assert_eq!(changes.len(), 3);
        assert!((changes[1].before - changes[0].after).abs() < f64::EPSILON);
        assert!((changes[1].reward + 0.5).abs() < f64::EPSILON);
        assert!((model.score("bike") - 0.04).abs() < 1e-12);
    }

    #[test]
    fn any_reward_magnitude_is_accepted() {
        let mut model = PreferenceModel::with_learning_rate(0.5);
        model.update("x", 10.0);
        assert!((model.score("x") - 5.0).abs() < 1e-12);
    }

    #[test]
    fn learning_rate_is_clamped() {
        let rate = |value: f64| PreferenceModel::with_learning_rate(value).learning_rate();
        assert!((rate(3.0) - 1.0).abs() < f64::EPSILON);
        assert!(rate(-1.0).abs() < f64::EPSILON);
        assert!((rate(f64::NAN) - DEFAULT_LEARNING_RATE).abs() < f64::EPSILON);
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: PreferenceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PreferenceConfig::default());

        let json = r#"{"learning_rate": 0.25, "rewards": {"accept": 2.0, "decline": -1.0}}"#;
        let config: PreferenceConfig = serde_json::from_str(json).unwrap();
        assert!((config.learning_rate - 0.25).abs() < f64::EPSILON);
        assert!((config.rewards.reward(Verdict::Declined) + 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn trait_snapshot_and_load_roundtrip() {
        let mut model = PreferenceModel::new();
        Preference::update(&mut model, "bike", 1.0);
        let snapshot = Preference::snapshot(&model);

        let mut restored = PreferenceModel::new();
        Preference::load(&mut restored, snapshot.clone());
        assert_eq!(restored.scores(), &snapshot);
    }
}
