use serde::{Deserialize, Serialize};

use crate::detection::Category;
use crate::page::ElementHandle;

/// Sessions shorter than this are treated as accidental scroll-pasts.
pub const MIN_OBSERVATION_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackerStatus {
    #[default]
    Idle,
    Tracking,
}

/// The single in-flight watch session of a site context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub session_id: String,
    pub tracked_element: ElementHandle,
    pub started_at_ms: i64,
    pub category: Category,
}

impl ActiveSession {
    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.started_at_ms).max(0)
    }

    /// Whole seconds, half rounding up.
    pub fn duration_secs(&self, now_ms: i64) -> u64 {
        round_ms_to_secs(self.elapsed_ms(now_ms))
    }
}

pub fn round_ms_to_secs(elapsed_ms: i64) -> u64 {
    let elapsed_ms = elapsed_ms.max(0) as u64;
    (elapsed_ms + 500) / 1000
}

/// Output of a closed session that cleared the minimum duration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedObservation {
    pub category: Category,
    pub duration_secs: u64,
}

/// Why a session was closed; only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Ended,
    Paused,
    LeftViewport,
    Superseded,
    Navigation,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Ended => "media ended",
            EndReason::Paused => "media paused",
            EndReason::LeftViewport => "left viewport",
            EndReason::Superseded => "superseded by another video",
            EndReason::Navigation => "navigated away",
        }
    }
}
