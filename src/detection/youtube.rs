use std::time::Duration;

use crate::detection::{CadencePolicy, EndPolicy, Site, SiteDetector, VisibilityScorer};
use crate::page::{CandidateElement, ElementHandle, PageSnapshot, VisibilityPolicy};

const SHORTS_MARKERS: [&str; 3] = ["#shorts-player", "ytd-shorts", "[is-shorts]"];

const MIN_WIDTH_PX: f64 = 200.0;
const MIN_HEIGHT_PX: f64 = 300.0;

/// Shorts on the dedicated shorts surface. The predicate is strict enough
/// that no ranking is needed.
#[derive(Debug, Clone, Default)]
pub struct YouTubeDetector;

impl YouTubeDetector {
    pub fn new() -> Self {
        Self
    }

    fn on_shorts_surface(page: &PageSnapshot) -> bool {
        page.location.path().contains("/shorts/")
            || SHORTS_MARKERS.iter().any(|marker| page.has_marker(marker))
    }
}

impl SiteDetector for YouTubeDetector {
    fn site(&self) -> Site {
        Site::YouTube
    }

    fn marker_selectors(&self) -> &'static [&'static str] {
        &SHORTS_MARKERS
    }

    fn is_eligible(&self, candidate: &CandidateElement, page: &PageSnapshot) -> bool {
        if !Self::on_shorts_surface(page) {
            return false;
        }

        let rect = &candidate.rect;
        rect.width > MIN_WIDTH_PX
            && rect.height > MIN_HEIGHT_PX
            && rect.intersects_viewport(page.viewport_height)
    }

    /// Every eligible element that is not the running tracked one starts a
    /// session, so the last one in document order wins.
    fn select(
        &self,
        page: &PageSnapshot,
        tracked: Option<ElementHandle>,
        _scorer: &VisibilityScorer,
    ) -> Vec<ElementHandle> {
        let mut current = tracked;
        let mut starts = Vec::new();
        for candidate in self.enumerate_candidates(page) {
            if self.is_eligible(candidate, page) && Some(candidate.handle) != current {
                current = Some(candidate.handle);
                starts.push(candidate.handle);
            }
        }
        starts
    }

    fn cadence(&self) -> CadencePolicy {
        CadencePolicy {
            mutation_debounce: None,
            initial_delay: Duration::ZERO,
            periodic: None,
        }
    }

    fn end_policy(&self) -> EndPolicy {
        EndPolicy {
            honor_pause: true,
            visibility: VisibilityPolicy {
                threshold: 0.5,
                root_margin_px: 0.0,
                settle: None,
            },
        }
    }

    fn is_watch_route(&self, path: &str) -> bool {
        path.contains("/shorts/")
    }

    fn wants_periodic_pass(&self, _path: &str) -> bool {
        false
    }

    fn navigation_delay(&self, _path: &str) -> Duration {
        Duration::from_secs(1)
    }
}
