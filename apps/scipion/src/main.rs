//! # Scipion - Project Store CLI
//!
//! The main binary over the `scipion-core` object store.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            apps/scipion (THE BINARY)          │
//! │                                               │
//! │  ┌─────────────┐        ┌─────────────────┐   │
//! │  │    CLI      │        │     Config      │   │
//! │  │   (clap)    │        │ (toml + env)    │   │
//! │  └──────┬──────┘        └────────┬────────┘   │
//! │         └────────────┬───────────┘            │
//! │                      ▼                        │
//! │              ┌───────────────┐                │
//! │              │ scipion-core  │                │
//! │              │ (THE STORE)   │                │
//! │              └───────────────┘                │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! scipion -P ./betagal init
//! scipion -P ./betagal status
//! scipion -P ./betagal graph --dot
//! scipion -P ./betagal export -o betagal.scpx
//! ```

use clap::Parser;
use scipion::cli;
use scipion::config::{Config, LogFormat, LogSection};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // Config decides the log format, so it is loaded before tracing is up.
    let config = Config::load(cli.config.as_deref());
    let log = config
        .as_ref()
        .map(|config| config.log.clone())
        .unwrap_or_default();
    init_tracing(&log);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, &config) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Install the subscriber: `RUST_LOG` first, then the configured filter.
fn init_tracing(log: &LogSection) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log.filter().into());

    match log.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

fn print_banner() {
    println!("Scipion project store v{}", env!("CARGO_PKG_VERSION"));
    println!();
}
