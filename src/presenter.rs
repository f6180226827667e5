//! Everything the user sees: the toolbar badge, its tooltip and the popup
//! summary with its admonition line. Pure functions of an
//! [`AggregateSnapshot`] plus "today", except for [`SummaryView::refresh`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::db::{helpers::day_key, AggregateSnapshot, CategoryTotals};
use crate::detection::Category;
use crate::messaging::MessageClient;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

pub const BADGE_COLOR: &str = "#ff4444";
pub const BADGE_COLOR_HALF_HOUR: &str = "#ff2222";
pub const BADGE_COLOR_HOUR: &str = "#cc0000";

/// How long the popup waits for a `GET_STATS` answer.
const STATS_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const QUOTES: [&str; 15] = [
    "Time is the most valuable thing we have... 🕐",
    "Every scroll is a choice you made 📱",
    "Your future self is watching you right now ⏰",
    "This moment will never come back 🌅",
    "What could you have learned instead? 📚",
    "Your dreams are waiting for your attention 💭",
    "Mindless scrolling = mindless living 🧠",
    "You are what you repeatedly do 🔄",
    "Time wasted is life wasted ⚰️",
    "Your goals miss you when you're scrolling 🎯",
    "Every minute here is a minute not building yourself 🏗️",
    "The algorithm knows you better than you know yourself 🤖",
    "You're training your brain for instant gratification 🧠⚡",
    "Real life is happening while you watch others live 🌍",
    "Your attention is your most precious resource 💎",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub text: String,
    pub color: &'static str,
    pub tooltip: String,
}

impl Default for Badge {
    fn default() -> Self {
        Self {
            text: String::new(),
            color: BADGE_COLOR,
            tooltip: tooltip(0, 0),
        }
    }
}

impl Badge {
    pub fn from_snapshot(snapshot: &AggregateSnapshot, today: &str) -> Self {
        let today_secs = snapshot.day(today).total_time();
        let lifetime = snapshot.lifetime();

        let mut color = BADGE_COLOR;
        let text = if today_secs > 0 {
            let minutes = (today_secs as f64 / 60.0).round() as u64;
            if minutes > 60 {
                color = BADGE_COLOR_HOUR;
            } else if minutes > 30 {
                color = BADGE_COLOR_HALF_HOUR;
            }
            format!("{minutes}m")
        } else if lifetime.total_count() > 0 {
            lifetime.total_count().to_string()
        } else {
            String::new()
        };

        Self {
            text,
            color,
            tooltip: tooltip(lifetime.total_count(), lifetime.total_time()),
        }
    }
}

fn tooltip(total_videos: u64, total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let mut text = format!("{total_videos} videos watched");
    if hours > 0 {
        text.push_str(&format!(" • {hours}h {minutes}m wasted"));
    } else if minutes > 0 {
        text.push_str(&format!(" • {minutes}m of your life"));
    }
    text
}

/// `Xh Ym`, `Ym Zs` or `Zs`.
pub fn format_time(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let remaining = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {remaining}s")
    } else {
        format!("{remaining}s")
    }
}

/// `Ym` or `Zs`.
pub fn format_time_short(seconds: u64) -> String {
    let minutes = seconds / 60;
    if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{seconds}s")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Calm,
    Elevated,
    High,
}

impl Severity {
    pub fn assess(today_secs: u64, today_videos: u64) -> Self {
        if today_secs > 3600 || today_videos > 100 {
            Severity::High
        } else if today_secs > 1800 || today_videos > 50 {
            Severity::Elevated
        } else {
            Severity::Calm
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admonition {
    pub text: String,
    pub severity: Severity,
}

impl Admonition {
    pub fn for_snapshot<R: Rng + ?Sized>(
        snapshot: &AggregateSnapshot,
        today: &str,
        rng: &mut R,
    ) -> Self {
        let day = snapshot.day(today);
        let today_secs = day.total_time();
        let today_videos = day.total_count();
        let lifetime_secs = snapshot.lifetime().total_time();

        let text = if today_secs > 3600 {
            "You've spent over an hour today feeding the algorithm 🤖".to_string()
        } else if today_videos > 50 {
            format!("{today_videos} videos today... Really? 😤")
        } else if lifetime_secs > 36_000 {
            "You've watched 10+ hours of short videos total 😱".to_string()
        } else if today_secs > 1800 {
            "30+ minutes gone today... Time flies when you're scrolling ⏰".to_string()
        } else {
            QUOTES.choose(rng).copied().unwrap_or(QUOTES[0]).to_string()
        };

        Self {
            text,
            severity: Severity::assess(today_secs, today_videos),
        }
    }
}

/// The popup's rendered numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub reels_count: u64,
    pub reels_time: String,
    pub shorts_count: u64,
    pub shorts_time: String,
    pub today_reels: String,
    pub today_shorts: String,
    pub total_videos: u64,
    pub total_time: String,
    pub admonition: Admonition,
}

fn today_line(totals: &CategoryTotals) -> String {
    format!("{} videos, {}", totals.count, format_time_short(totals.total_time))
}

impl Summary {
    pub fn render<R: Rng + ?Sized>(snapshot: &AggregateSnapshot, today: &str, rng: &mut R) -> Self {
        let day = snapshot.day(today);
        let lifetime = snapshot.lifetime();
        Self {
            reels_count: snapshot.reels.count,
            reels_time: format_time(snapshot.reels.total_time),
            shorts_count: snapshot.shorts.count,
            shorts_time: format_time(snapshot.shorts.total_time),
            today_reels: today_line(day.get(Category::Reels)),
            today_shorts: today_line(day.get(Category::Shorts)),
            total_videos: lifetime.total_count(),
            total_time: format_time(lifetime.total_time()),
            admonition: Admonition::for_snapshot(snapshot, today, rng),
        }
    }
}

/// Holds the last successfully rendered summary across refreshes.
#[derive(Debug, Default)]
pub struct SummaryView {
    last: Option<Summary>,
}

impl SummaryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Summary> {
        self.last.as_ref()
    }

    /// Queries the background service and re-renders. A failed or unanswered
    /// query leaves the previous summary in place.
    pub async fn refresh(
        &mut self,
        client: &MessageClient,
        now: DateTime<Utc>,
    ) -> Option<&Summary> {
        match tokio::time::timeout(STATS_QUERY_TIMEOUT, client.get_stats()).await {
            Ok(Ok(snapshot)) => {
                let summary = Summary::render(&snapshot, &day_key(now), &mut rand::thread_rng());
                self.last = Some(summary);
            }
            Ok(Err(err)) => log_error!("Error loading stats: {err:?}"),
            Err(_) => log_warn!(
                "No stats received from background service within {:?}",
                STATS_QUERY_TIMEOUT
            ),
        }
        self.last.as_ref()
    }
}
