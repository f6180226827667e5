//! Boundary between page-side trackers and the background service that owns
//! the aggregate store.

pub mod client;
pub mod service;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::db::AggregateSnapshot;
use crate::detection::Category;
use crate::session::{CompletedObservation, MIN_OBSERVATION_SECS};

pub use client::MessageClient;
pub use service::{BackgroundService, ServiceHandle};

/// Wire messages. `type` carries the tag; reports carry `duration` in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "TRACK_REEL")]
    ReportReel { duration: u64 },
    #[serde(rename = "TRACK_SHORT")]
    ReportShort { duration: u64 },
    #[serde(rename = "GET_STATS")]
    GetStats,
    #[serde(rename = "RESET_STATS")]
    ResetStats,
}

impl Message {
    pub fn report(category: Category, duration_secs: u64) -> Self {
        match category {
            Category::Reels => Message::ReportReel {
                duration: duration_secs,
            },
            Category::Shorts => Message::ReportShort {
                duration: duration_secs,
            },
        }
    }

    /// Category and duration of a report, `None` for queries.
    pub fn as_report(&self) -> Option<(Category, u64)> {
        match *self {
            Message::ReportReel { duration } => Some((Category::Reels, duration)),
            Message::ReportShort { duration } => Some((Category::Shorts, duration)),
            Message::GetStats | Message::ResetStats => None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let message: Message = serde_json::from_str(raw)?;
        if let Some((category, duration)) = message.as_report() {
            if duration < MIN_OBSERVATION_SECS {
                bail!(
                    "{category} report of {duration}s is below the {}s minimum",
                    MIN_OBSERVATION_SECS
                );
            }
        }
        Ok(message)
    }
}

impl From<CompletedObservation> for Message {
    fn from(observation: CompletedObservation) -> Self {
        Message::report(observation.category, observation.duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Stats(AggregateSnapshot),
    Done,
}

/// Where a site context sends the observations it closes.
pub trait ObservationSink: Send + Sync {
    fn submit(&self, observation: CompletedObservation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_match_the_extension_protocol() {
        assert_eq!(
            serde_json::to_value(Message::report(Category::Reels, 12)).unwrap(),
            json!({"type": "TRACK_REEL", "duration": 12})
        );
        assert_eq!(
            serde_json::to_value(Message::GetStats).unwrap(),
            json!({"type": "GET_STATS"})
        );
        assert_eq!(
            Message::parse(r#"{"type":"TRACK_SHORT","duration":9}"#).unwrap(),
            Message::ReportShort { duration: 9 }
        );
        assert_eq!(
            Message::parse(r#"{"type":"RESET_STATS"}"#).unwrap(),
            Message::ResetStats
        );
    }

    #[test]
    fn rejects_unknown_and_undersized_messages() {
        assert!(Message::parse(r#"{"type":"TRACK_MOVIE","duration":9}"#).is_err());
        assert!(Message::parse(r#"{"type":"TRACK_REEL"}"#).is_err());
        assert!(Message::parse(r#"{"type":"TRACK_REEL","duration":1}"#).is_err());
    }

    #[test]
    fn observation_converts_to_its_category_report() {
        let observation = CompletedObservation {
            category: Category::Shorts,
            duration_secs: 7,
        };
        assert_eq!(Message::from(observation), Message::ReportShort { duration: 7 });
    }
}
