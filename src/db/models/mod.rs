pub mod stats;

pub use stats::{AggregateSnapshot, CategoryTotals, DayStats};
