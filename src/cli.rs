use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};

use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::detection::Category;
use crate::messaging::{BackgroundService, MessageClient};
use crate::presenter::{format_time, SummaryView};
use crate::replay::{replay, Trace};
use crate::session::CompletedObservation;
use crate::settings::{default_data_dir, default_settings_path, SettingsStore, TrackerSettings};

#[derive(Parser)]
#[command(name = "reelwatch", version, about = "Time spent on reels and shorts")]
pub struct Cli {
    /// Settings file (default: <data dir>/reelwatch/settings.json)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Database file, overrides the settings
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Show lifetime and today's totals
    Stats {
        /// Print the raw GET_STATS reply
        #[arg(long)]
        json: bool,
    },

    /// Show the badge text, color and tooltip
    Badge,

    /// Record one finished observation
    Record {
        /// reel(s) or short(s)
        category: Category,
        /// Watch time in whole seconds (at least 2)
        secs: u64,
    },

    /// Reset all tracking data
    Reset,

    /// Run a recorded page event trace through the detector
    Replay {
        trace: PathBuf,
        /// Also write the resulting observations to the store
        #[arg(long)]
        record: bool,
    },
}

struct Paths {
    settings: TrackerSettings,
    database: PathBuf,
}

fn resolve(cli: &Cli) -> Result<Paths> {
    let data_dir = default_data_dir()?;
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(|| default_settings_path(&data_dir));
    let settings = SettingsStore::new(settings_path)?.get();
    let database = cli
        .database
        .clone()
        .unwrap_or_else(|| settings.resolve_database_path(&data_dir));
    Ok(Paths { settings, database })
}

pub async fn execute(cli: Cli) -> Result<()> {
    let paths = resolve(&cli)?;

    if let Commands::Replay { trace, record } = &cli.command {
        return run_replay(&paths, trace, *record).await;
    }

    let db = Database::new(paths.database.clone())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = BackgroundService::spawn(
        db,
        clock.clone(),
        paths.settings.badge_refresh_interval(),
    );
    let client = service.client();

    let result = match cli.command {
        Commands::Stats { json } => print_stats(&client, clock.as_ref(), json).await,
        Commands::Badge => client.get_stats().await.map(|_| {
            let badge = service.badge().borrow().clone();
            println!("text:    {}", badge.text);
            println!("color:   {}", badge.color);
            println!("tooltip: {}", badge.tooltip);
        }),
        Commands::Record { category, secs } => client
            .record(CompletedObservation {
                category,
                duration_secs: secs,
            })
            .await
            .map(|_| println!("recorded {category} observation of {}", format_time(secs))),
        Commands::Reset => client
            .reset()
            .await
            .map(|_| println!("all tracking data reset")),
        Commands::Replay { .. } => Ok(()),
    };

    service.shutdown().await;
    result
}

async fn print_stats(client: &MessageClient, clock: &dyn Clock, json: bool) -> Result<()> {
    if json {
        let reply = client.send_json(r#"{"type":"GET_STATS"}"#).await?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    let mut view = SummaryView::new();
    let summary = view
        .refresh(client, clock.now())
        .await
        .context("no stats available")?;
    println!("Reels:  {} videos, {}", summary.reels_count, summary.reels_time);
    println!("Shorts: {} videos, {}", summary.shorts_count, summary.shorts_time);
    println!("Today:  reels {}, shorts {}", summary.today_reels, summary.today_shorts);
    println!("Total:  {} videos, {}", summary.total_videos, summary.total_time);
    println!();
    println!("{}", summary.admonition.text);
    Ok(())
}

async fn run_replay(paths: &Paths, trace_path: &Path, record: bool) -> Result<()> {
    let trace = Trace::load(trace_path)?;
    let report = replay(&trace, &paths.settings)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if record {
        let db = Database::new(paths.database.clone())?;
        for timed in &report.observations {
            let at = Utc
                .timestamp_millis_opt(trace.start_ms + timed.at_ms)
                .single()
                .context("observation timestamp out of range")?;
            db.record_observation(
                timed.observation.category,
                timed.observation.duration_secs,
                at,
            )
            .await?;
        }
        log::info!(
            "recorded {} replayed observations into {}",
            report.observations.len(),
            db.path().display()
        );
    }
    Ok(())
}
