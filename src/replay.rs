//! Deterministic replays of recorded page activity.
//!
//! A trace is a timeline of host events (videos appearing, scrolling, media
//! events, navigation). The replayer drives a [`SiteContext`] over a
//! [`ScriptedPage`] with a manual clock, honoring the same delays the live
//! scheduler uses, and reports every observation the tracker closes.
//!
//! Navigation steps only change the page URL; the engine sees them on the
//! next URL poll tick, as it would live. The periodic poll stops at the last
//! step, while the URL poll fires once more so a final navigation still
//! closes the session.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, ManualClock};
use crate::detection::{Site, VisibilityScorer};
use crate::engine::SiteContext;
use crate::page::{
    CandidateElement, ElementHandle, IntersectionEntry, MediaEventKind, Page, PageSnapshot, Rect,
    ScriptedPage,
};
use crate::session::{
    ActiveSession, CompletedObservation, PendingVisibilityLoss, VisibilityOutcome,
};
use crate::settings::TrackerSettings;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub site: Site,
    pub href: String,
    pub viewport_height: f64,
    /// Wall-clock time of `atMs = 0`, in Unix milliseconds.
    #[serde(default)]
    pub start_ms: i64,
    pub steps: Vec<TraceStep>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read trace {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse trace {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    /// Offset from the start of the trace.
    pub at_ms: i64,
    pub event: TraceEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TraceEvent {
    PutVideo { video: CandidateElement },
    RemoveVideo { handle: ElementHandle },
    SetPlaying { handle: ElementHandle, playing: bool },
    MoveVideo { handle: ElementHandle, rect: Rect },
    Scroll { dy: f64 },
    AddMarker { selector: String },
    RemoveMarker { selector: String },
    Navigate { href: String },
    Media { handle: ElementHandle, media: MediaEventKind },
    /// A DOM mutation batch, i.e. one detection pass.
    Evaluate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedObservation {
    /// Offset from the start of the trace.
    pub at_ms: i64,
    #[serde(flatten)]
    pub observation: CompletedObservation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub observations: Vec<TimedObservation>,
    /// Session still open when the trace ran out; never recorded.
    pub unfinished: Option<ActiveSession>,
}

#[derive(Debug, Clone, Copy)]
enum Deferred {
    Pass,
    /// Re-arms itself until the trace runs out.
    Periodic(i64),
    /// Re-arms itself until the trace runs out, then fires one last time.
    UrlPoll(i64),
    ConfirmVisibilityLoss(PendingVisibilityLoss),
}

struct Replayer {
    start_ms: i64,
    clock: ManualClock,
    page: ScriptedPage,
    context: SiteContext,
    /// Keyed by (due, sequence) so same-instant actions keep insertion order.
    deferred: BTreeMap<(i64, u64), Deferred>,
    sequence: u64,
    finished: bool,
    observations: Vec<TimedObservation>,
}

pub fn replay(trace: &Trace, settings: &TrackerSettings) -> Result<ReplayReport> {
    let page = ScriptedPage::new(trace.href.clone(), trace.viewport_height);
    let scorer = VisibilityScorer::new(settings.scoring.clone());
    let context = SiteContext::new(trace.site.detector(), scorer, trace.href.clone());
    let cadence = context.detector().cadence();

    let mut replayer = Replayer {
        start_ms: trace.start_ms,
        clock: ManualClock::new(trace.start_ms),
        page,
        context,
        deferred: BTreeMap::new(),
        sequence: 0,
        finished: false,
        observations: Vec::new(),
    };
    replayer.defer(duration_ms(cadence.initial_delay), Deferred::Pass);
    if let Some(period) = cadence.periodic {
        let period_ms = duration_ms(period).max(1);
        replayer.defer(period_ms, Deferred::Periodic(period_ms));
    }
    let url_poll_ms = duration_ms(settings.url_poll_interval()).max(1);
    replayer.defer(url_poll_ms, Deferred::UrlPoll(url_poll_ms));

    let mut last_at = 0;
    for step in &trace.steps {
        if step.at_ms < last_at {
            bail!(
                "trace steps must be in time order ({} after {})",
                step.at_ms,
                last_at
            );
        }
        last_at = step.at_ms;

        replayer.run_deferred_until(trace.start_ms + step.at_ms)?;
        replayer.clock.set(trace.start_ms + step.at_ms);
        replayer.apply(&step.event)?;
    }
    replayer.run_deferred_until(trace.start_ms + last_at)?;
    replayer.finished = true;
    replayer
        .deferred
        .retain(|_, action| !matches!(action, Deferred::Periodic(_)));
    replayer.run_deferred_until(i64::MAX)?;

    let unfinished = replayer.context.tracker().active().cloned();
    log_info!(
        "replayed {} steps: {} observations, session open at end: {}",
        trace.steps.len(),
        replayer.observations.len(),
        unfinished.is_some()
    );
    Ok(ReplayReport {
        observations: replayer.observations,
        unfinished,
    })
}

fn duration_ms(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl Replayer {
    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    fn defer(&mut self, delay_ms: i64, action: Deferred) {
        self.sequence += 1;
        self.deferred
            .insert((self.now().saturating_add(delay_ms), self.sequence), action);
    }

    fn run_deferred_until(&mut self, until_ms: i64) -> Result<()> {
        while let Some(entry) = self.deferred.first_entry() {
            let (due, _) = *entry.key();
            if due > until_ms {
                break;
            }
            let action = entry.remove();
            self.clock.set(due);
            match action {
                Deferred::Pass => self.pass()?,
                Deferred::Periodic(period_ms) => {
                    if self.context.wants_periodic_pass() {
                        self.pass()?;
                    }
                    if !self.finished {
                        self.defer(period_ms, Deferred::Periodic(period_ms));
                    }
                }
                Deferred::UrlPoll(period_ms) => {
                    self.poll_url()?;
                    if !self.finished {
                        self.defer(period_ms, Deferred::UrlPoll(period_ms));
                    }
                }
                Deferred::ConfirmVisibilityLoss(pending) => {
                    let before = self.context.tracked();
                    let observation = self.context.confirm_visibility_loss(&pending, due);
                    self.settle(before, observation);
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, event: &TraceEvent) -> Result<()> {
        log_debug!("replay @{}ms: {:?}", self.now() - self.start_ms, event);
        match event {
            TraceEvent::PutVideo { video } => self.page.put_video(video.clone()),
            TraceEvent::RemoveVideo { handle } => self.page.remove_video(*handle),
            TraceEvent::SetPlaying { handle, playing } => {
                self.page.set_playing(*handle, *playing)
            }
            TraceEvent::MoveVideo { handle, rect } => {
                let entries = self.page.move_video(*handle, *rect);
                self.intersections(entries);
            }
            TraceEvent::Scroll { dy } => {
                let entries = self.page.scroll_by(*dy);
                self.intersections(entries);
            }
            TraceEvent::AddMarker { selector } => self.page.add_marker(selector.clone()),
            TraceEvent::RemoveMarker { selector } => self.page.remove_marker(selector),
            TraceEvent::Navigate { href } => self.page.navigate(href.clone()),
            TraceEvent::Media { handle, media } => {
                let before = self.context.tracked();
                let observation = self.context.on_media_event(*handle, *media, self.now());
                self.settle(before, observation);
            }
            TraceEvent::Evaluate => self.pass()?,
        }
        Ok(())
    }

    fn poll_url(&mut self) -> Result<()> {
        let href = self.page.href();
        let before = self.context.tracked();
        if let Some(outcome) = self.context.on_url_poll(&href, self.now())? {
            self.settle(before, outcome.observation);
            self.defer(duration_ms(outcome.recheck_after), Deferred::Pass);
        }
        Ok(())
    }

    fn pass(&mut self) -> Result<()> {
        let markers = self.context.detector().marker_selectors();
        let snapshot = PageSnapshot::capture(&self.page, markers)?;
        let before = self.context.tracked();
        let evaluation = self.context.evaluate(&snapshot, self.now());
        self.settle(before, evaluation.observation);
        if let Some(handle) = evaluation.started {
            if self.page.is_attached(handle) {
                let policy = self.context.tracker().end_policy().visibility;
                self.page.observe(handle, &policy);
            }
        }
        Ok(())
    }

    fn intersections(&mut self, entries: Vec<IntersectionEntry>) {
        for entry in entries {
            let before = self.context.tracked();
            match self.context.on_intersection(&entry, self.now()) {
                VisibilityOutcome::Ignored => {}
                VisibilityOutcome::Closed(observation) => self.settle(before, observation),
                VisibilityOutcome::Pending(pending) => {
                    let settle = self
                        .context
                        .tracker()
                        .end_policy()
                        .visibility
                        .settle
                        .unwrap_or_default();
                    self.defer(duration_ms(settle), Deferred::ConfirmVisibilityLoss(pending));
                }
            }
        }
    }

    fn settle(&mut self, before: Option<ElementHandle>, observation: Option<CompletedObservation>) {
        if let Some(observation) = observation {
            self.observations.push(TimedObservation {
                at_ms: self.now() - self.start_ms,
                observation,
            });
        }
        if let Some(previous) = before {
            if self.context.tracked() != Some(previous) && self.page.is_attached(previous) {
                self.page.release(previous);
            }
        }
    }
}
