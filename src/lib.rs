mod utils;

pub mod clock;
pub mod db;
pub mod detection;
pub mod engine;
pub mod messaging;
pub mod navigation;
pub mod page;
pub mod presenter;
pub mod replay;
pub mod runtime;
pub mod session;
pub mod settings;

mod cli;

use clap::Parser;
use env_logger::Env;

pub use cli::{Cli, Commands};

pub async fn run() -> anyhow::Result<()> {
    let debug_mode = std::env::var("REELWATCH_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // RUST_LOG still wins when set
    env_logger::Builder::from_env(Env::default().default_filter_or(if debug_mode {
        "debug"
    } else {
        "info"
    }))
    .init();

    cli::execute(Cli::parse()).await
}
