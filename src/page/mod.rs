//! Host-side view of a page: opaque element handles, geometry and the
//! structural facts a detector needs. The engine never holds a live element,
//! only handles that the host can answer liveness questions about.

pub mod scripted;

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

pub use scripted::ScriptedPage;

/// Opaque reference to a media element owned by the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(pub u64);

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "video#{}", self.0)
    }
}

/// Bounding box in viewport pixels, as reported by `getBoundingClientRect`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(top: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            bottom: top + height,
            width,
            height,
        }
    }

    pub fn center_y(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// True when some part of the box lies inside `[0, viewport_height)`.
    pub fn intersects_viewport(&self, viewport_height: f64) -> bool {
        self.top < viewport_height && self.bottom > 0.0
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    pub fn translated(&self, dy: f64) -> Self {
        Self {
            top: self.top + dy,
            bottom: self.bottom + dy,
            ..*self
        }
    }
}

/// DOM facts around a video that the host extracts once per snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StructuralHints {
    /// Enclosed in an `<article>` post container.
    pub in_article: bool,
    /// Carries the `playsinline` attribute.
    pub plays_inline: bool,
    /// `aria-label`s of controls inside the video's enclosing container.
    pub control_labels: Vec<String>,
    /// Class names of the video's ancestors.
    pub ancestor_classes: Vec<String>,
}

/// A playable media element as seen during one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateElement {
    pub handle: ElementHandle,
    pub rect: Rect,
    #[serde(default)]
    pub current_time: f64,
    #[serde(default = "default_paused")]
    pub paused: bool,
    #[serde(default)]
    pub video_width: u32,
    #[serde(default)]
    pub video_height: u32,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub hints: StructuralHints,
}

const fn default_paused() -> bool {
    true
}

impl CandidateElement {
    pub fn new(handle: ElementHandle, rect: Rect) -> Self {
        Self {
            handle,
            rect,
            current_time: 0.0,
            paused: true,
            video_width: 0,
            video_height: 0,
            src: String::new(),
            hints: StructuralHints::default(),
        }
    }

    pub fn playing(mut self, current_time: f64) -> Self {
        self.paused = false;
        self.current_time = current_time;
        self
    }

    pub fn with_hints(mut self, hints: StructuralHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Current document location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    href: String,
    path: String,
}

impl Location {
    pub fn parse(href: &str) -> Result<Self> {
        let url = Url::parse(href).with_context(|| format!("invalid page url '{href}'"))?;
        Ok(Self {
            href: href.to_string(),
            path: url.path().to_string(),
        })
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Immutable capture of everything a detection pass reads from the host.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub location: Location,
    pub viewport_height: f64,
    pub markers: BTreeSet<String>,
    pub candidates: Vec<CandidateElement>,
}

impl PageSnapshot {
    /// Reads the host once, asking only about the marker selectors the caller cares about.
    pub fn capture(page: &dyn Page, marker_selectors: &[&str]) -> Result<Self> {
        let location = Location::parse(&page.href())?;
        let markers = marker_selectors
            .iter()
            .filter(|selector| page.has_element(selector))
            .map(|selector| selector.to_string())
            .collect();

        Ok(Self {
            location,
            viewport_height: page.viewport_height(),
            markers,
            candidates: page.videos(),
        })
    }

    pub fn has_marker(&self, selector: &str) -> bool {
        self.markers.contains(selector)
    }

    pub fn contains(&self, handle: ElementHandle) -> bool {
        self.candidates.iter().any(|c| c.handle == handle)
    }
}

/// Media events the host forwards for elements the engine asked to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaEventKind {
    Ended,
    Pause,
}

/// Host-side intersection observer configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityPolicy {
    /// Intersection ratio at which the host observer fires.
    pub threshold: f64,
    /// Root margin in pixels, grows the viewport on every side.
    pub root_margin_px: f64,
    /// Wait before trusting a "left the viewport" report.
    pub settle: Option<std::time::Duration>,
}

impl VisibilityPolicy {
    /// Fraction of the element's height inside the margin-expanded viewport.
    pub fn intersection_ratio(&self, rect: &Rect, viewport_height: f64) -> f64 {
        if rect.height <= 0.0 {
            return 0.0;
        }
        let root_top = -self.root_margin_px;
        let root_bottom = viewport_height + self.root_margin_px;
        let overlap = rect.bottom.min(root_bottom) - rect.top.max(root_top);
        (overlap.max(0.0) / rect.height).min(1.0)
    }

    /// Builds the entry an `IntersectionObserver` would deliver for this geometry.
    pub fn entry_for(
        &self,
        handle: ElementHandle,
        rect: &Rect,
        viewport_height: f64,
    ) -> IntersectionEntry {
        let ratio = self.intersection_ratio(rect, viewport_height);
        IntersectionEntry {
            handle,
            is_intersecting: ratio > 0.0,
            ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionEntry {
    pub handle: ElementHandle,
    pub is_intersecting: bool,
    #[serde(default)]
    pub ratio: f64,
}

/// The host document. Implemented by a content-script bridge in production
/// and by [`ScriptedPage`] for replays and tests.
pub trait Page: Send + Sync {
    fn href(&self) -> String;
    fn viewport_height(&self) -> f64;
    /// Every `<video>` in document order.
    fn videos(&self) -> Vec<CandidateElement>;
    fn has_element(&self, selector: &str) -> bool;
    /// Whether the handle still refers to an element attached to the document.
    fn is_attached(&self, handle: ElementHandle) -> bool;
    /// Start delivering media and intersection events for `handle`.
    fn observe(&self, handle: ElementHandle, policy: &VisibilityPolicy);
    /// Stop delivering events for `handle`.
    fn release(&self, handle: ElementHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_keeps_href_and_extracts_path() {
        let location = Location::parse("https://www.instagram.com/reels/?utm=x").unwrap();
        assert_eq!(location.path(), "/reels/");
        assert_eq!(location.href(), "https://www.instagram.com/reels/?utm=x");
        assert!(Location::parse("not a url").is_err());
    }

    #[test]
    fn rect_viewport_intersection_is_exclusive_at_edges() {
        assert!(Rect::new(0.0, 300.0, 500.0).intersects_viewport(800.0));
        assert!(!Rect::new(800.0, 300.0, 500.0).intersects_viewport(800.0));
        assert!(!Rect::new(-500.0, 300.0, 500.0).intersects_viewport(800.0));
    }

    #[test]
    fn root_margin_extends_the_viewport() {
        let rect = Rect::new(820.0, 300.0, 100.0);
        let strict = VisibilityPolicy {
            threshold: 0.5,
            root_margin_px: 0.0,
            settle: None,
        };
        let generous = VisibilityPolicy {
            root_margin_px: 50.0,
            ..strict
        };
        assert!(!strict.entry_for(ElementHandle(1), &rect, 800.0).is_intersecting);
        let entry = generous.entry_for(ElementHandle(1), &rect, 800.0);
        assert!(entry.is_intersecting);
        assert!((entry.ratio - 0.3).abs() < 1e-9);
    }

    #[test]
    fn candidate_json_defaults_to_paused() {
        let candidate: CandidateElement = serde_json::from_str(
            r#"{"handle": 3, "rect": {"top": 0, "bottom": 400, "width": 300, "height": 400}}"#,
        )
        .unwrap();
        assert!(candidate.paused);
        assert_eq!(candidate.handle, ElementHandle(3));
        assert!(candidate.hints.control_labels.is_empty());
    }
}
