use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::detection::{Site, VisibilityScorer};
use crate::engine::{Evaluation, SiteContext};
use crate::messaging::ObservationSink;
use crate::page::{ElementHandle, IntersectionEntry, MediaEventKind, Page, PageSnapshot};
use crate::session::{
    ActiveSession, CompletedObservation, PendingVisibilityLoss, TrackerStatus, VisibilityOutcome,
};
use crate::settings::TrackerSettings;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Why a detection pass ran. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Attach,
    Mutation,
    Periodic,
    Navigation,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Attach => "attach",
            Trigger::Mutation => "mutation",
            Trigger::Periodic => "periodic",
            Trigger::Navigation => "navigation",
            Trigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Schedules detection passes for one attached page and routes host events
/// into its [`SiteContext`]. Every handler runs to completion under the
/// context lock, so triggers never interleave.
#[derive(Clone)]
pub struct TrackerController {
    context: Arc<Mutex<SiteContext>>,
    page: Arc<dyn Page>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ObservationSink>,
    cancel_token: CancellationToken,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    debounce: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TrackerController {
    /// Builds the site context and starts the attach check, the URL poll and
    /// (where the site wants it) the periodic poll.
    pub async fn attach(
        site: Site,
        page: Arc<dyn Page>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ObservationSink>,
        settings: &TrackerSettings,
    ) -> Self {
        let detector = site.detector();
        let cadence = detector.cadence();
        let href = page.href();
        let context = SiteContext::new(
            detector,
            VisibilityScorer::new(settings.scoring.clone()),
            href.clone(),
        );

        let controller = Self {
            context: Arc::new(Mutex::new(context)),
            page,
            clock,
            sink,
            cancel_token: CancellationToken::new(),
            workers: Arc::new(Mutex::new(Vec::new())),
            debounce: Arc::new(Mutex::new(None)),
        };
        log_info!("{} tracker attached to {}", site.category(), href);

        let mut workers = vec![
            controller.spawn_delayed_pass(cadence.initial_delay, Trigger::Attach),
            tokio::spawn(controller.clone().url_poll_loop(settings.url_poll_interval())),
        ];
        if let Some(period) = cadence.periodic {
            workers.push(tokio::spawn(controller.clone().periodic_loop(period)));
        }
        *controller.workers.lock().await = workers;

        controller
    }

    pub async fn status(&self) -> TrackerStatus {
        self.context.lock().await.tracker().status()
    }

    pub async fn tracked(&self) -> Option<ElementHandle> {
        self.context.lock().await.tracked()
    }

    fn is_detached(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub async fn evaluate_now(&self, trigger: Trigger) -> Result<Evaluation> {
        if self.is_detached() {
            return Ok(Evaluation::default());
        }
        let mut context = self.context.lock().await;
        self.run_pass(&mut context, trigger)
    }

    /// A batch of DOM mutations. Sites with a debounce get one trailing pass
    /// per burst; the others get a pass per batch.
    pub async fn notify_mutations(&self) -> Result<()> {
        if self.is_detached() {
            return Ok(());
        }
        let debounce = self.context.lock().await.detector().cadence().mutation_debounce;
        match debounce {
            None => self.evaluate_now(Trigger::Mutation).await.map(|_| ()),
            Some(delay) => {
                let next = self.spawn_delayed_pass(delay, Trigger::Mutation);
                if let Some(previous) = self.debounce.lock().await.replace(next) {
                    previous.abort();
                }
                Ok(())
            }
        }
    }

    pub async fn notify_media_event(&self, handle: ElementHandle, kind: MediaEventKind) {
        if self.is_detached() {
            return;
        }
        let mut context = self.context.lock().await;
        let before = context.tracked();
        let observation = context.on_media_event(handle, kind, self.clock.now_ms());
        self.settle(&context, before, observation);
    }

    pub async fn notify_intersection(&self, entry: IntersectionEntry) {
        if self.is_detached() {
            return;
        }
        let mut context = self.context.lock().await;
        let before = context.tracked();
        match context.on_intersection(&entry, self.clock.now_ms()) {
            VisibilityOutcome::Ignored => {}
            VisibilityOutcome::Closed(observation) => self.settle(&context, before, observation),
            VisibilityOutcome::Pending(pending) => {
                let delay = context
                    .tracker()
                    .end_policy()
                    .visibility
                    .settle
                    .unwrap_or_default();
                log_debug!("{} reported out of view, confirming in {:?}", pending.handle, delay);
                let controller = self.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = controller.cancel_token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            controller.confirm_visibility_loss(pending).await;
                        }
                    }
                });
            }
        }
    }

    async fn confirm_visibility_loss(&self, pending: PendingVisibilityLoss) {
        let mut context = self.context.lock().await;
        let before = context.tracked();
        let observation = context.confirm_visibility_loss(&pending, self.clock.now_ms());
        self.settle(&context, before, observation);
    }

    /// Reads the host URL once; on a route change closes a session that
    /// cannot continue and schedules a re-check.
    pub async fn poll_url(&self) -> Result<()> {
        if self.is_detached() {
            return Ok(());
        }
        let href = self.page.href();
        let mut context = self.context.lock().await;
        let before = context.tracked();
        let outcome = context
            .on_url_poll(&href, self.clock.now_ms())
            .with_context(|| format!("failed to process navigation to {href}"))?;
        let Some(outcome) = outcome else {
            return Ok(());
        };

        self.settle(&context, before, outcome.observation);
        drop(context);

        self.spawn_delayed_pass(outcome.recheck_after, Trigger::Navigation);
        Ok(())
    }

    /// Stops every timer and drops the in-flight session unrecorded.
    pub async fn shutdown(&self) -> Option<ActiveSession> {
        self.cancel_token.cancel();
        if let Some(pending) = self.debounce.lock().await.take() {
            pending.abort();
        }

        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(err) = worker.await {
                if !err.is_cancelled() {
                    log_error!("tracker worker failed to join: {err:?}");
                }
            }
        }

        let mut context = self.context.lock().await;
        let lost = context.abandon();
        if let Some(session) = &lost {
            if self.page.is_attached(session.tracked_element) {
                self.page.release(session.tracked_element);
            }
        }
        lost
    }

    fn run_pass(&self, context: &mut SiteContext, trigger: Trigger) -> Result<Evaluation> {
        let markers = context.detector().marker_selectors();
        let snapshot = PageSnapshot::capture(self.page.as_ref(), markers)
            .context("failed to snapshot page")?;
        let before = context.tracked();
        let evaluation = context.evaluate(&snapshot, self.clock.now_ms());
        log_debug!(
            "{} pass on {} over {} candidates: {:?}",
            trigger,
            snapshot.location.path(),
            snapshot.candidates.len(),
            evaluation
        );

        self.settle(context, before, evaluation.observation);
        if let Some(handle) = evaluation.started {
            if self.page.is_attached(handle) {
                self.page
                    .observe(handle, &context.tracker().end_policy().visibility);
            }
        }
        Ok(evaluation)
    }

    /// Forwards a closed session and stops observing an element that is no
    /// longer tracked.
    fn settle(
        &self,
        context: &SiteContext,
        before: Option<ElementHandle>,
        observation: Option<CompletedObservation>,
    ) {
        if let Some(observation) = observation {
            self.sink.submit(observation);
        }
        if let Some(previous) = before {
            if context.tracked() != Some(previous) && self.page.is_attached(previous) {
                self.page.release(previous);
            }
        }
    }

    fn spawn_delayed_pass(&self, delay: Duration, trigger: Trigger) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = controller.cancel_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(err) = controller.evaluate_now(trigger).await {
                        log_warn!("{trigger} pass failed: {err:?}");
                    }
                }
            }
        })
    }

    async fn url_poll_loop(self, every: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.poll_url().await {
                        log_warn!("url poll failed: {err:?}");
                    }
                }
            }
        }
    }

    async fn periodic_loop(self, every: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let mut context = self.context.lock().await;
                    if !context.wants_periodic_pass() {
                        continue;
                    }
                    if let Err(err) = self.run_pass(&mut context, Trigger::Periodic) {
                        log_warn!("periodic pass failed: {err:?}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Category;
    use crate::page::{CandidateElement, Rect, ScriptedPage, StructuralHints};

    /// Wall clock that follows tokio's (paused) time.
    struct TokioClock {
        origin: Instant,
    }

    impl Clock for TokioClock {
        fn now_ms(&self) -> i64 {
            self.origin.elapsed().as_millis() as i64
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        observations: std::sync::Mutex<Vec<CompletedObservation>>,
    }

    impl CollectingSink {
        fn observations(&self) -> Vec<CompletedObservation> {
            self.observations.lock().unwrap().clone()
        }
    }

    impl ObservationSink for CollectingSink {
        fn submit(&self, observation: CompletedObservation) {
            self.observations.lock().unwrap().push(observation);
        }
    }

    struct Harness {
        page: Arc<ScriptedPage>,
        sink: Arc<CollectingSink>,
        controller: TrackerController,
    }

    async fn attach(site: Site, href: &str, viewport_height: f64) -> Harness {
        let page = Arc::new(ScriptedPage::new(href, viewport_height));
        let sink = Arc::new(CollectingSink::default());
        let clock = Arc::new(TokioClock {
            origin: Instant::now(),
        });
        let controller = TrackerController::attach(
            site,
            page.clone(),
            clock,
            sink.clone(),
            &TrackerSettings::default(),
        )
        .await;
        Harness {
            page,
            sink,
            controller,
        }
    }

    fn reel(id: u64, top: f64) -> CandidateElement {
        CandidateElement::new(ElementHandle(id), Rect::new(top, 400.0, 700.0)).playing(0.5)
    }

    fn feed_post(id: u64) -> CandidateElement {
        reel(id, 50.0).with_hints(StructuralHints {
            in_article: true,
            ..StructuralHints::default()
        })
    }

    fn short(id: u64) -> CandidateElement {
        CandidateElement::new(ElementHandle(id), Rect::new(90.0, 405.0, 720.0)).playing(0.2)
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn attach_check_runs_after_initial_delay() {
        let h = attach(Site::Instagram, "https://www.instagram.com/reels/", 800.0).await;
        h.page.put_video(reel(1, 50.0));

        sleep_ms(1_900).await;
        assert_eq!(h.controller.tracked().await, None);

        sleep_ms(200).await;
        assert_eq!(h.controller.tracked().await, Some(ElementHandle(1)));
        assert!(h.page.is_observed(ElementHandle(1)));
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_bursts_get_one_trailing_pass() {
        let h = attach(Site::Instagram, "https://www.instagram.com/", 800.0).await;
        sleep_ms(2_100).await;
        assert_eq!(h.controller.status().await, TrackerStatus::Idle);

        h.page.put_video(feed_post(1));
        h.controller.notify_mutations().await.unwrap();
        sleep_ms(300).await;
        h.controller.notify_mutations().await.unwrap();
        sleep_ms(300).await;
        h.controller.notify_mutations().await.unwrap();
        sleep_ms(300).await;
        assert_eq!(h.controller.tracked().await, None);

        sleep_ms(300).await;
        assert_eq!(h.controller.tracked().await, Some(ElementHandle(1)));
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shorts_pause_ends_session_and_releases_element() {
        let h = attach(Site::YouTube, "https://www.youtube.com/shorts/abc", 900.0).await;
        h.page.put_video(short(7));
        h.controller.notify_mutations().await.unwrap();
        assert_eq!(h.controller.tracked().await, Some(ElementHandle(7)));

        sleep_ms(5_200).await;
        h.controller
            .notify_media_event(ElementHandle(7), MediaEventKind::Pause)
            .await;

        assert_eq!(
            h.sink.observations(),
            vec![CompletedObservation {
                category: Category::Shorts,
                duration_secs: 5
            }]
        );
        assert!(!h.page.is_observed(ElementHandle(7)));
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_the_viewport_ends_after_the_settle_delay() {
        let h = attach(Site::Instagram, "https://www.instagram.com/reels/", 800.0).await;
        h.page.put_video(reel(1, 50.0));
        sleep_ms(10_000).await;

        let entries = h.page.scroll_by(800.0);
        assert_eq!(entries.len(), 1);
        for entry in entries {
            h.controller.notify_intersection(entry).await;
        }
        assert_eq!(h.controller.tracked().await, Some(ElementHandle(1)));

        sleep_ms(1_500).await;
        assert_eq!(h.controller.tracked().await, None);
        assert_eq!(
            h.sink.observations(),
            vec![CompletedObservation {
                category: Category::Reels,
                duration_secs: 9
            }]
        );
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_poll_switches_to_the_newly_centered_reel() {
        let h = attach(Site::Instagram, "https://www.instagram.com/reels/", 800.0).await;
        h.page.put_video(reel(1, 50.0));
        h.page.put_video(reel(2, 850.0));
        sleep_ms(4_000).await;
        assert_eq!(h.controller.tracked().await, Some(ElementHandle(1)));

        h.page.scroll_by(800.0);
        sleep_ms(2_500).await;
        assert_eq!(h.controller.tracked().await, Some(ElementHandle(2)));
        assert_eq!(h.sink.observations()[0].duration_secs, 4);
        assert!(!h.page.is_observed(ElementHandle(1)));
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn navigating_off_shorts_closes_the_session() {
        let h = attach(Site::YouTube, "https://www.youtube.com/shorts/abc", 900.0).await;
        h.page.put_video(short(3));
        h.controller.notify_mutations().await.unwrap();

        sleep_ms(4_500).await;
        h.page.navigate("https://www.youtube.com/feed/subscriptions");
        sleep_ms(2_000).await;

        assert_eq!(h.controller.tracked().await, None);
        assert_eq!(
            h.sink.observations(),
            vec![CompletedObservation {
                category: Category::Shorts,
                duration_secs: 5
            }]
        );
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_the_open_session() {
        let h = attach(Site::YouTube, "https://www.youtube.com/shorts/abc", 900.0).await;
        h.page.put_video(short(3));
        h.controller.evaluate_now(Trigger::Manual).await.unwrap();
        sleep_ms(30_000).await;

        let lost = h.controller.shutdown().await.unwrap();
        assert_eq!(lost.tracked_element, ElementHandle(3));
        assert!(h.sink.observations().is_empty());
        assert!(!h.page.is_observed(ElementHandle(3)));

        h.controller.notify_mutations().await.unwrap();
        assert_eq!(h.controller.tracked().await, None);
    }
}
