use std::time::Duration;

use anyhow::Result;

use crate::detection::{SiteDetector, VisibilityScorer};
use crate::navigation::NavigationWatcher;
use crate::page::{ElementHandle, IntersectionEntry, MediaEventKind, PageSnapshot};
use crate::session::{
    ActiveSession, CompletedObservation, EndReason, PendingVisibilityLoss, SessionTracker,
    VisibilityOutcome,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Result of one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Evaluation {
    /// Element tracked after the pass, when the pass started a session.
    pub started: Option<ElementHandle>,
    /// Observation of the session the pass displaced.
    pub observation: Option<CompletedObservation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationOutcome {
    pub observation: Option<CompletedObservation>,
    pub recheck_after: Duration,
}

/// Everything one site integration owns: its detector, the scorer, the
/// session tracker and the navigation watcher. Built once per attached page.
///
/// Every method is a pure function of its arguments and the context's own
/// state, so the scheduler and trace replays drive exactly the same logic.
pub struct SiteContext {
    detector: Box<dyn SiteDetector>,
    scorer: VisibilityScorer,
    tracker: SessionTracker,
    watcher: NavigationWatcher,
}

impl SiteContext {
    pub fn new(
        detector: Box<dyn SiteDetector>,
        scorer: VisibilityScorer,
        initial_href: impl Into<String>,
    ) -> Self {
        let tracker = SessionTracker::new(detector.category(), detector.end_policy());
        Self {
            detector,
            scorer,
            tracker,
            watcher: NavigationWatcher::new(initial_href),
        }
    }

    pub fn detector(&self) -> &dyn SiteDetector {
        self.detector.as_ref()
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn tracked(&self) -> Option<ElementHandle> {
        self.tracker.tracked()
    }

    pub fn current_href(&self) -> &str {
        &self.watcher.route().href
    }

    pub fn evaluate(&mut self, page: &PageSnapshot, now_ms: i64) -> Evaluation {
        let tracked = self.tracker.tracked();
        if let Some(handle) = tracked {
            if !page.contains(handle) {
                log_debug!("tracked {} is no longer in the document", handle);
            }
        }

        let starts = self.detector.select(page, tracked, &self.scorer);
        let mut evaluation = Evaluation::default();
        for handle in starts {
            let displaced = self.tracker.start(handle, now_ms);
            evaluation.observation = evaluation.observation.or(displaced);
            evaluation.started = Some(handle);
        }
        evaluation
    }

    pub fn on_media_event(
        &mut self,
        handle: ElementHandle,
        kind: MediaEventKind,
        now_ms: i64,
    ) -> Option<CompletedObservation> {
        self.tracker.on_media_event(handle, kind, now_ms)
    }

    pub fn on_intersection(&mut self, entry: &IntersectionEntry, now_ms: i64) -> VisibilityOutcome {
        self.tracker.on_intersection(entry, now_ms)
    }

    pub fn confirm_visibility_loss(
        &mut self,
        pending: &PendingVisibilityLoss,
        now_ms: i64,
    ) -> Option<CompletedObservation> {
        self.tracker.confirm_visibility_loss(pending, now_ms)
    }

    /// Feeds one URL poll. On navigation, closes a session whose route is no
    /// longer watchable and tells the caller when to re-run detection.
    pub fn on_url_poll(&mut self, href: &str, now_ms: i64) -> Result<Option<NavigationOutcome>> {
        let Some(change) = self.watcher.poll(href)? else {
            return Ok(None);
        };

        let path = change.to.path();
        let leaving = self.tracker.active().is_some() && !self.detector.is_watch_route(path);
        let observation = if leaving {
            log_info!(
                "navigated away from {} to {}, ending current session",
                change.from,
                path
            );
            self.tracker.end(now_ms, EndReason::Navigation)
        } else {
            None
        };

        Ok(Some(NavigationOutcome {
            observation,
            recheck_after: self.detector.navigation_delay(path),
        }))
    }

    pub fn wants_periodic_pass(&self) -> bool {
        match crate::page::Location::parse(self.current_href()) {
            Ok(location) => self.detector.wants_periodic_pass(location.path()),
            Err(_) => false,
        }
    }

    /// Drops the in-flight session without recording it, as a page unload does.
    pub fn abandon(&mut self) -> Option<ActiveSession> {
        let session = self.tracker.active().cloned();
        if let Some(session) = &session {
            log_info!(
                "abandoning {} session on {} without recording",
                session.category,
                session.tracked_element
            );
        }
        self.tracker = SessionTracker::new(self.detector.category(), self.detector.end_policy());
        session
    }
}
