pub mod config;
pub mod instagram;
pub mod scoring;
pub mod youtube;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::page::{CandidateElement, ElementHandle, PageSnapshot, VisibilityPolicy};

pub use config::ScoringConfig;
pub use instagram::InstagramDetector;
pub use scoring::{ScoredCandidate, VisibilityScorer};
pub use youtube::YouTubeDetector;

/// Content category an observation is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Reels,
    Shorts,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Reels => "reels",
            Category::Shorts => "shorts",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "reels" | "reel" => Ok(Category::Reels),
            "shorts" | "short" => Ok(Category::Shorts),
            other => Err(anyhow!("unknown category '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Instagram,
    YouTube,
}

impl Site {
    pub fn category(&self) -> Category {
        match self {
            Site::Instagram => Category::Reels,
            Site::YouTube => Category::Shorts,
        }
    }

    pub fn detector(&self) -> Box<dyn SiteDetector> {
        match self {
            Site::Instagram => Box::new(InstagramDetector::new()),
            Site::YouTube => Box::new(YouTubeDetector::new()),
        }
    }
}

/// When a site wants detection passes to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadencePolicy {
    /// Trailing settle after a mutation burst; `None` runs a pass per batch.
    pub mutation_debounce: Option<Duration>,
    /// Delay before the unconditional pass after attaching.
    pub initial_delay: Duration,
    /// Poll interval while on a watching route; `None` disables polling.
    pub periodic: Option<Duration>,
}

/// Which signals end a tracked session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndPolicy {
    pub honor_pause: bool,
    pub visibility: VisibilityPolicy,
}

/// Site-specific DOM conventions behind one capability set. Session and
/// scoring logic are shared; only discovery, eligibility and timing differ.
pub trait SiteDetector: Send + Sync {
    fn site(&self) -> Site;

    fn category(&self) -> Category {
        self.site().category()
    }

    /// Selectors whose presence the snapshot must report.
    fn marker_selectors(&self) -> &'static [&'static str] {
        &[]
    }

    /// Candidates worth considering, in document order.
    fn enumerate_candidates<'a>(&self, page: &'a PageSnapshot) -> Vec<&'a CandidateElement> {
        page.candidates.iter().collect()
    }

    fn is_eligible(&self, candidate: &CandidateElement, page: &PageSnapshot) -> bool;

    /// Elements that should start a session this pass, applied in order.
    /// Empty when the current session should continue.
    fn select(
        &self,
        page: &PageSnapshot,
        tracked: Option<ElementHandle>,
        scorer: &VisibilityScorer,
    ) -> Vec<ElementHandle>;

    fn cadence(&self) -> CadencePolicy;

    fn end_policy(&self) -> EndPolicy;

    /// Whether an open session may survive navigation to `path`.
    fn is_watch_route(&self, path: &str) -> bool;

    /// Whether the periodic poll should run a pass while on `path`.
    fn wants_periodic_pass(&self, path: &str) -> bool {
        self.is_watch_route(path)
    }

    /// Wait after a route change before re-running detection.
    fn navigation_delay(&self, path: &str) -> Duration;
}
