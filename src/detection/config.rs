use serde::{Deserialize, Serialize};

/// Weights for the visibility heuristic, plus the floor a winner must clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoringConfig {
    /// Added when the element is playing (not paused).
    pub playing_bonus: f64,

    /// Added when playback has actually started (`currentTime > 0`).
    pub started_bonus: f64,

    /// Centering bonus at zero distance from the viewport's vertical center.
    pub center_bonus_max: f64,
    /// Pixels of center distance that cost one point of centering bonus.
    pub center_falloff_px: f64,

    /// Pixel area worth one point of size bonus.
    pub size_divisor: f64,

    /// A ranked winner must score strictly above this to start a session.
    pub activation_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            playing_bonus: 100.0,
            started_bonus: 50.0,
            center_bonus_max: 100.0,
            center_falloff_px: 10.0,
            size_divisor: 10_000.0,
            activation_threshold: 50.0,
        }
    }
}
