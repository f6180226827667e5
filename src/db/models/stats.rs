//! Aggregate counters as the presentation layer sees them.
//!
//! The JSON shape (camelCase, `dailyStats` keyed by `YYYY-MM-DD`) is what
//! the `GET_STATS` reply carries over the message boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detection::Category;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotals {
    pub count: u64,
    /// Seconds.
    pub total_time: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStats {
    pub reels: CategoryTotals,
    pub shorts: CategoryTotals,
}

impl DayStats {
    pub fn get(&self, category: Category) -> &CategoryTotals {
        match category {
            Category::Reels => &self.reels,
            Category::Shorts => &self.shorts,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut CategoryTotals {
        match category {
            Category::Reels => &mut self.reels,
            Category::Shorts => &mut self.shorts,
        }
    }

    pub fn total_time(&self) -> u64 {
        self.reels.total_time + self.shorts.total_time
    }

    pub fn total_count(&self) -> u64 {
        self.reels.count + self.shorts.count
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub reels: CategoryTotals,
    pub shorts: CategoryTotals,
    pub daily_stats: BTreeMap<String, DayStats>,
}

impl AggregateSnapshot {
    pub fn lifetime(&self) -> DayStats {
        DayStats {
            reels: self.reels,
            shorts: self.shorts,
        }
    }

    pub fn totals_mut(&mut self, category: Category) -> &mut CategoryTotals {
        match category {
            Category::Reels => &mut self.reels,
            Category::Shorts => &mut self.shorts,
        }
    }

    /// Stats for one day bucket; all zero when nothing was recorded that day.
    pub fn day(&self, day: &str) -> DayStats {
        self.daily_stats.get(day).copied().unwrap_or_default()
    }
}
