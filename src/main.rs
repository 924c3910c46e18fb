//! # Recipe Press
//!
//! Builds a static download site of e-book news editions. Each publication
//! in the recipe registry is converted by an external e-book tool (or
//! restored from the previously published site when it is not due), given
//! a dated filename and a plain cover, fanned out into extra formats and
//! listed in `index.html`, `index.json` and `feed.xml`.
//!
//! ## Usage
//!
//! ```sh
//! recipe_press https://example.com/news/ --publish-dir public --regenerate economist
//! ```
//!
//! Set `RUST_LOG` to override the log filter; `-v` raises the default to `debug`.

use clap::Parser;
use recipe_press::cli::Cli;
use recipe_press::config::BuildConfig;
use recipe_press::pipeline;
use recipe_press::utils::format_elapsed;
use std::error::Error;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init ---
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "recipe_press starting up");
    debug!(?args, "Parsed CLI arguments");

    let config = match BuildConfig::from_cli(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid publish site URL");
            return Err(e.into());
        }
    };

    let summary = pipeline::run(config).await?;

    info!(
        publications = summary.index.entries.len(),
        failed = summary.failed,
        elapsed = %format_elapsed(start_time.elapsed()),
        "recipe_press finished"
    );
    Ok(())
}
