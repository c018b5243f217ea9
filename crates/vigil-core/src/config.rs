use serde::Deserialize;
use std::time::Duration;

/// Tunables for the decision engine. Every field has a default, so a
/// partial `[engine]` table in the daemon's TOML file is enough.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Recognitions with confidence below this resolve to an identity.
    pub accept_threshold: f64,
    /// Stricter bound a recognition must meet before its face is captured.
    pub high_confidence_threshold: f64,
    /// Minimum time between two captures or logs for the same label.
    pub cooldown_ms: u64,
    /// Fractional movement or area change that counts as a new pose.
    pub pose_change_threshold: f64,
    /// Newly captured photos that trigger a background retrain.
    pub retrain_threshold: u32,
    /// How long an unknown face must stay in view before it can be enrolled.
    pub unknown_stable_ms: u64,
    /// Frames kept for clip export (15 s at 30 fps).
    pub buffer_capacity: usize,
    /// Height samples a label needs before it takes part in height matching.
    pub min_height_samples: usize,
    /// Maximum relative deviation from a label's mean height.
    pub height_tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 80.0,
            high_confidence_threshold: 50.0,
            cooldown_ms: 5000,
            pose_change_threshold: 0.15,
            retrain_threshold: 10,
            unknown_stable_ms: 2000,
            buffer_capacity: 450,
            min_height_samples: 10,
            height_tolerance: 0.15,
        }
    }
}

impl EngineConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn unknown_stable(&self) -> Duration {
        Duration::from_millis(self.unknown_stable_ms)
    }
}
