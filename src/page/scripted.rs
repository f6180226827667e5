use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{CandidateElement, ElementHandle, IntersectionEntry, Page, Rect, VisibilityPolicy};

/// What the observer last reported for one element.
struct Observation {
    policy: VisibilityPolicy,
    above_threshold: bool,
    intersecting: bool,
}

struct ScriptedState {
    href: String,
    viewport_height: f64,
    videos: Vec<CandidateElement>,
    markers: BTreeSet<String>,
    observed: HashMap<ElementHandle, Observation>,
}

/// In-memory page driven by explicit calls instead of a browser.
///
/// Scrolling re-evaluates every observed element against its policy and
/// returns the intersection entries a real observer would have delivered:
/// one per element whose ratio crossed the policy threshold or that entered
/// or left the viewport entirely.
pub struct ScriptedPage {
    state: Mutex<ScriptedState>,
}

impl ScriptedPage {
    pub fn new(href: impl Into<String>, viewport_height: f64) -> Self {
        Self {
            state: Mutex::new(ScriptedState {
                href: href.into(),
                viewport_height,
                videos: Vec::new(),
                markers: BTreeSet::new(),
                observed: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn navigate(&self, href: impl Into<String>) {
        self.lock().href = href.into();
    }

    pub fn add_marker(&self, selector: impl Into<String>) {
        self.lock().markers.insert(selector.into());
    }

    pub fn remove_marker(&self, selector: &str) {
        self.lock().markers.remove(selector);
    }

    /// Inserts or replaces a video, keeping document order for existing handles.
    pub fn put_video(&self, video: CandidateElement) {
        let mut state = self.lock();
        match state.videos.iter_mut().find(|v| v.handle == video.handle) {
            Some(existing) => *existing = video,
            None => state.videos.push(video),
        }
    }

    pub fn remove_video(&self, handle: ElementHandle) {
        let mut state = self.lock();
        state.videos.retain(|v| v.handle != handle);
        state.observed.remove(&handle);
    }

    pub fn set_playing(&self, handle: ElementHandle, playing: bool) {
        let mut state = self.lock();
        if let Some(video) = state.videos.iter_mut().find(|v| v.handle == handle) {
            video.paused = !playing;
        }
    }

    pub fn is_observed(&self, handle: ElementHandle) -> bool {
        self.lock().observed.contains_key(&handle)
    }

    /// Moves every video by `-dy` pixels (positive `dy` scrolls down).
    pub fn scroll_by(&self, dy: f64) -> Vec<IntersectionEntry> {
        let mut state = self.lock();
        for video in state.videos.iter_mut() {
            video.rect = video.rect.translated(-dy);
        }
        Self::pending_entries(&mut state)
    }

    pub fn move_video(&self, handle: ElementHandle, rect: Rect) -> Vec<IntersectionEntry> {
        let mut state = self.lock();
        if let Some(video) = state.videos.iter_mut().find(|v| v.handle == handle) {
            video.rect = rect;
        }
        Self::pending_entries(&mut state)
    }

    fn pending_entries(state: &mut ScriptedState) -> Vec<IntersectionEntry> {
        let viewport_height = state.viewport_height;
        let mut entries = Vec::new();
        for video in &state.videos {
            let Some(observation) = state.observed.get_mut(&video.handle) else {
                continue;
            };
            let entry = observation
                .policy
                .entry_for(video.handle, &video.rect, viewport_height);
            let above = entry.ratio >= observation.policy.threshold;
            if above != observation.above_threshold
                || entry.is_intersecting != observation.intersecting
            {
                observation.above_threshold = above;
                observation.intersecting = entry.is_intersecting;
                entries.push(entry);
            }
        }
        entries
    }
}

impl Page for ScriptedPage {
    fn href(&self) -> String {
        self.lock().href.clone()
    }

    fn viewport_height(&self) -> f64 {
        self.lock().viewport_height
    }

    fn videos(&self) -> Vec<CandidateElement> {
        self.lock().videos.clone()
    }

    fn has_element(&self, selector: &str) -> bool {
        self.lock().markers.contains(selector)
    }

    fn is_attached(&self, handle: ElementHandle) -> bool {
        self.lock().videos.iter().any(|v| v.handle == handle)
    }

    fn observe(&self, handle: ElementHandle, policy: &VisibilityPolicy) {
        let mut state = self.lock();
        let viewport_height = state.viewport_height;
        let (above_threshold, intersecting) = state
            .videos
            .iter()
            .find(|v| v.handle == handle)
            .map(|v| {
                let entry = policy.entry_for(handle, &v.rect, viewport_height);
                (entry.ratio >= policy.threshold, entry.is_intersecting)
            })
            .unwrap_or((false, false));
        state.observed.insert(
            handle,
            Observation {
                policy: *policy,
                above_threshold,
                intersecting,
            },
        );
    }

    fn release(&self, handle: ElementHandle) {
        self.lock().observed.remove(&handle);
    }
}
