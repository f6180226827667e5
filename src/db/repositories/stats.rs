use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::{
    helpers::{day_key, parse_category, parse_day, to_i64, to_u64},
    models::AggregateSnapshot,
    Database,
};
use crate::detection::Category;
use crate::session::MIN_OBSERVATION_SECS;

fn load_aggregate(conn: &Connection) -> Result<AggregateSnapshot> {
    let mut snapshot = AggregateSnapshot::default();

    let mut totals = conn.prepare("SELECT category, count, total_time FROM category_totals")?;
    let mut rows = totals.query([])?;
    while let Some(row) = rows.next()? {
        let category = parse_category(&row.get::<_, String>(0)?)?;
        let entry = snapshot.totals_mut(category);
        entry.count = to_u64(row.get(1)?, "count")?;
        entry.total_time = to_u64(row.get(2)?, "total_time")?;
    }

    let mut daily = conn.prepare(
        "SELECT day, category, count, total_time FROM daily_stats ORDER BY day ASC",
    )?;
    let mut rows = daily.query([])?;
    while let Some(row) = rows.next()? {
        let day: String = row.get(0)?;
        parse_day(&day)?;
        let category = parse_category(&row.get::<_, String>(1)?)?;
        let bucket = snapshot.daily_stats.entry(day).or_default();
        let entry = bucket.get_mut(category);
        entry.count = to_u64(row.get(2)?, "count")?;
        entry.total_time = to_u64(row.get(3)?, "total_time")?;
    }

    Ok(snapshot)
}

impl Database {
    /// Adds one observation to the lifetime totals and to the UTC day bucket
    /// of `at`. Both updates commit together.
    pub async fn record_observation(
        &self,
        category: Category,
        duration_secs: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if duration_secs < MIN_OBSERVATION_SECS {
            bail!(
                "{category} observation of {duration_secs}s is below the {}s minimum",
                MIN_OBSERVATION_SECS
            );
        }

        let day = day_key(at);
        self.execute(move |conn| {
            let duration = to_i64(duration_secs)?;
            let tx = conn
                .transaction()
                .context("failed to open observation transaction")?;

            tx.execute(
                "INSERT INTO category_totals (category, count, total_time)
                 VALUES (?1, 1, ?2)
                 ON CONFLICT(category) DO UPDATE SET
                     count = count + 1,
                     total_time = total_time + excluded.total_time",
                params![category.as_str(), duration],
            )
            .context("failed to update category totals")?;

            tx.execute(
                "INSERT INTO daily_stats (day, category, count, total_time)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(day, category) DO UPDATE SET
                     count = count + 1,
                     total_time = total_time + excluded.total_time",
                params![day, category.as_str(), duration],
            )
            .context("failed to update daily stats")?;

            tx.commit().context("failed to commit observation")?;
            Ok(())
        })
        .await
    }

    pub async fn read_aggregate(&self) -> Result<AggregateSnapshot> {
        self.execute(|conn| load_aggregate(conn).context("failed to read aggregate stats"))
            .await
    }

    /// Back to first-run state: zero totals, no day buckets.
    pub async fn reset(&self) -> Result<()> {
        self.execute(|conn| {
            let tx = conn
                .transaction()
                .context("failed to open reset transaction")?;
            tx.execute("DELETE FROM daily_stats", [])?;
            tx.execute("UPDATE category_totals SET count = 0, total_time = 0", [])?;
            tx.commit().context("failed to commit reset")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CategoryTotals, DayStats};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn fresh_store_reads_all_zero() {
        let db = Database::in_memory().unwrap();
        let snapshot = db.read_aggregate().await.unwrap();
        assert_eq!(snapshot, AggregateSnapshot::default());
        assert!(snapshot.daily_stats.is_empty());
    }

    #[tokio::test]
    async fn reel_and_short_on_the_same_day() {
        let db = Database::in_memory().unwrap();
        db.record_observation(Category::Reels, 45, at(1, 9)).await.unwrap();
        db.record_observation(Category::Shorts, 10, at(1, 21)).await.unwrap();

        let snapshot = db.read_aggregate().await.unwrap();
        assert_eq!(snapshot.reels, CategoryTotals { count: 1, total_time: 45 });
        assert_eq!(snapshot.shorts, CategoryTotals { count: 1, total_time: 10 });
        assert_eq!(snapshot.daily_stats.len(), 1);
        assert_eq!(
            snapshot.day("2025-06-01"),
            DayStats {
                reels: CategoryTotals { count: 1, total_time: 45 },
                shorts: CategoryTotals { count: 1, total_time: 10 },
            }
        );
    }

    #[tokio::test]
    async fn different_utc_days_get_separate_buckets() {
        let db = Database::in_memory().unwrap();
        db.record_observation(Category::Reels, 5, at(1, 23)).await.unwrap();
        db.record_observation(Category::Reels, 7, at(2, 0)).await.unwrap();
        db.record_observation(Category::Reels, 3, at(2, 12)).await.unwrap();

        let snapshot = db.read_aggregate().await.unwrap();
        assert_eq!(snapshot.reels, CategoryTotals { count: 3, total_time: 15 });
        assert_eq!(snapshot.day("2025-06-01").reels.total_time, 5);
        assert_eq!(snapshot.day("2025-06-02").reels, CategoryTotals { count: 2, total_time: 10 });
    }

    #[tokio::test]
    async fn observations_below_minimum_are_rejected() {
        let db = Database::in_memory().unwrap();
        assert!(db.record_observation(Category::Shorts, 1, at(1, 9)).await.is_err());
        assert_eq!(db.read_aggregate().await.unwrap(), AggregateSnapshot::default());
    }

    #[tokio::test]
    async fn reset_returns_to_first_run_state() {
        let db = Database::in_memory().unwrap();
        db.record_observation(Category::Reels, 45, at(1, 9)).await.unwrap();
        db.reset().await.unwrap();
        assert_eq!(db.read_aggregate().await.unwrap(), AggregateSnapshot::default());
    }

    #[tokio::test]
    async fn data_survives_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.sqlite");
        {
            let db = Database::new(path.clone()).unwrap();
            db.record_observation(Category::Shorts, 30, at(3, 8)).await.unwrap();
        }
        let db = Database::new(path).unwrap();
        let snapshot = db.read_aggregate().await.unwrap();
        assert_eq!(snapshot.shorts.total_time, 30);
    }

    #[tokio::test]
    async fn missing_totals_row_reads_as_zero() {
        let db = Database::in_memory().unwrap();
        db.execute(|conn| {
            conn.execute("DELETE FROM category_totals WHERE category = 'shorts'", [])?;
            Ok(())
        })
        .await
        .unwrap();
        let snapshot = db.read_aggregate().await.unwrap();
        assert_eq!(snapshot.shorts, CategoryTotals::default());

        db.record_observation(Category::Shorts, 4, at(1, 1)).await.unwrap();
        assert_eq!(db.read_aggregate().await.unwrap().shorts.count, 1);
    }

    fn observation() -> impl Strategy<Value = (bool, u64, u32)> {
        (any::<bool>(), 2u64..600, 1u32..4)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn recording_order_does_not_matter(
            observations in proptest::collection::vec(observation(), 1..8)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (forward, backward) = runtime.block_on(async {
                let forward_db = Database::in_memory().unwrap();
                let backward_db = Database::in_memory().unwrap();
                for (is_reel, secs, day) in &observations {
                    let category = if *is_reel { Category::Reels } else { Category::Shorts };
                    forward_db.record_observation(category, *secs, at(*day, 12)).await.unwrap();
                }
                for (is_reel, secs, day) in observations.iter().rev() {
                    let category = if *is_reel { Category::Reels } else { Category::Shorts };
                    backward_db.record_observation(category, *secs, at(*day, 12)).await.unwrap();
                }
                (
                    forward_db.read_aggregate().await.unwrap(),
                    backward_db.read_aggregate().await.unwrap(),
                )
            });
            prop_assert_eq!(forward, backward);
        }
    }
}
