use std::time::Duration;

use crate::detection::{
    CadencePolicy, EndPolicy, ScoredCandidate, Site, SiteDetector, VisibilityScorer,
};
use crate::page::{CandidateElement, ElementHandle, PageSnapshot, VisibilityPolicy};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_debug;

const MIN_WIDTH_PX: f64 = 150.0;
const MIN_HEIGHT_PX: f64 = 200.0;
const PORTRAIT_MIN_HEIGHT_PX: f64 = 300.0;

const CONTROL_LABEL_HINTS: [&str; 4] = ["Audio", "Like", "Play", "Pause"];
const CONTAINER_CLASS_HINTS: [&str; 2] = ["reel", "Reel"];

/// Reels on the feed, the dedicated reels page and single-reel pages.
///
/// Many videos can be mounted at once (infinite scroll preloads neighbours),
/// so candidates are ranked and only a clear winner above the activation
/// floor starts a session.
#[derive(Debug, Clone, Default)]
pub struct InstagramDetector;

impl InstagramDetector {
    pub fn new() -> Self {
        Self
    }

    fn is_reels_feed(path: &str) -> bool {
        path == "/reels" || path == "/reels/"
    }

    fn is_single_reel(path: &str) -> bool {
        path.contains("/reel/")
    }

    fn has_structural_signal(candidate: &CandidateElement) -> bool {
        let hints = &candidate.hints;
        hints.in_article
            || hints.plays_inline
            || hints
                .control_labels
                .iter()
                .any(|label| CONTROL_LABEL_HINTS.iter().any(|hint| label.contains(hint)))
            || (candidate.rect.is_portrait() && candidate.rect.height > PORTRAIT_MIN_HEIGHT_PX)
            || hints
                .ancestor_classes
                .iter()
                .any(|class| CONTAINER_CLASS_HINTS.iter().any(|hint| class.contains(hint)))
    }
}

impl SiteDetector for InstagramDetector {
    fn site(&self) -> Site {
        Site::Instagram
    }

    fn is_eligible(&self, candidate: &CandidateElement, page: &PageSnapshot) -> bool {
        let rect = &candidate.rect;
        let visible = rect.width > MIN_WIDTH_PX
            && rect.height > MIN_HEIGHT_PX
            && rect.intersects_viewport(page.viewport_height);
        if !visible {
            return false;
        }

        let path = page.location.path();
        if Self::is_reels_feed(path) || Self::is_single_reel(path) {
            return true;
        }

        let eligible = Self::has_structural_signal(candidate);
        log_debug!(
            "instagram {} on {} ({}x{}): structural signal = {}",
            candidate.handle,
            path,
            rect.width.round(),
            rect.height.round(),
            eligible
        );
        eligible
    }

    fn select(
        &self,
        page: &PageSnapshot,
        tracked: Option<ElementHandle>,
        scorer: &VisibilityScorer,
    ) -> Vec<ElementHandle> {
        let candidates = self.enumerate_candidates(page);
        log_debug!("found {} video elements on instagram", candidates.len());

        let scored = scorer.score_all(candidates.iter().copied(), page.viewport_height);
        let mut best: Option<ScoredCandidate> = None;
        for (candidate, scored) in candidates.iter().zip(scored) {
            log_debug!(
                "{} score {:.1} (paused={}, t={:.1}s, media {}x{}, src={})",
                candidate.handle,
                scored.score,
                candidate.paused,
                candidate.current_time,
                candidate.video_width,
                candidate.video_height,
                candidate.src
            );

            let best_score = best.map(|b| b.score).unwrap_or(0.0);
            if scored.score > best_score && self.is_eligible(candidate, page) {
                best = Some(scored);
            }
        }

        match best {
            Some(winner)
                if Some(winner.handle) != tracked
                    && winner.score > scorer.config().activation_threshold =>
            {
                vec![winner.handle]
            }
            _ => Vec::new(),
        }
    }

    fn cadence(&self) -> CadencePolicy {
        CadencePolicy {
            mutation_debounce: Some(Duration::from_millis(500)),
            initial_delay: Duration::from_secs(2),
            periodic: Some(Duration::from_secs(3)),
        }
    }

    /// Pause is ignored: people pause and resume reels constantly.
    fn end_policy(&self) -> EndPolicy {
        EndPolicy {
            honor_pause: false,
            visibility: VisibilityPolicy {
                threshold: 0.1,
                root_margin_px: 50.0,
                settle: Some(Duration::from_secs(1)),
            },
        }
    }

    fn is_watch_route(&self, path: &str) -> bool {
        path.contains("/reel")
    }

    fn navigation_delay(&self, path: &str) -> Duration {
        if path == "/reels" {
            Duration::from_secs(2)
        } else {
            Duration::from_secs(1)
        }
    }
}
