use crate::detection::config::ScoringConfig;
use crate::page::{CandidateElement, ElementHandle};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub handle: ElementHandle,
    pub score: f64,
}

/// Ranks candidates by how likely each one is the video being watched.
#[derive(Debug, Clone, Default)]
pub struct VisibilityScorer {
    config: ScoringConfig,
}

impl VisibilityScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Weighted sum of playback, centering and size terms. Unbounded above;
    /// only comparable against other scores from the same pass.
    pub fn score(&self, candidate: &CandidateElement, viewport_height: f64) -> f64 {
        score_playback(candidate, &self.config)
            + score_centering(candidate, viewport_height, &self.config)
            + score_size(candidate, &self.config)
    }

    pub fn score_all<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a CandidateElement>,
        viewport_height: f64,
    ) -> Vec<ScoredCandidate> {
        candidates
            .into_iter()
            .map(|candidate| ScoredCandidate {
                handle: candidate.handle,
                score: self.score(candidate, viewport_height),
            })
            .collect()
    }
}

fn score_playback(candidate: &CandidateElement, config: &ScoringConfig) -> f64 {
    let mut score = 0.0;
    if !candidate.paused {
        score += config.playing_bonus;
    }
    // Preloaded elements sit at currentTime 0 until they actually start.
    if candidate.current_time > 0.0 {
        score += config.started_bonus;
    }
    score
}

/// Linear falloff from the viewport's vertical center, floored at zero.
fn score_centering(
    candidate: &CandidateElement,
    viewport_height: f64,
    config: &ScoringConfig,
) -> f64 {
    let center_distance = (candidate.rect.center_y() - viewport_height / 2.0).abs();
    if config.center_falloff_px <= 0.0 {
        return config.center_bonus_max;
    }
    (config.center_bonus_max - center_distance / config.center_falloff_px).max(0.0)
}

fn score_size(candidate: &CandidateElement, config: &ScoringConfig) -> f64 {
    if config.size_divisor <= 0.0 {
        return 0.0;
    }
    candidate.rect.area().max(0.0) / config.size_divisor
}
