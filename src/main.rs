//! depmirror CLI application
//!
//! Fetches dependency blobs listed in an entries file into a verified,
//! size-bounded cache directory.

use std::process;

use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use depmirror::cli::{handle_evict, handle_fetch, handle_stats, Cli, Commands};
use depmirror::config::AppConfig;
use depmirror::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    let level = match cli.log_level() {
        Some(level) => level.to_string().to_lowercase(),
        None => configured_level(&cli).await,
    };
    init_logging(&level, cli.global.very_verbose);

    info!("depmirror v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Fetch(args) => {
            debug!("Executing fetch command");
            handle_fetch(args, &cli.global).await
        }
        Commands::Stats(args) => {
            debug!("Executing stats command");
            handle_stats(args, &cli.global).await
        }
        Commands::Evict(args) => {
            debug!("Executing evict command");
            handle_evict(args, &cli.global).await
        }
    }
}

/// Log level from the config file when no verbosity flag was given
///
/// Config errors are reported later by the command itself.
async fn configured_level(cli: &Cli) -> String {
    AppConfig::load(cli.global.config.as_deref())
        .await
        .map(|config| config.logging.level)
        .unwrap_or_else(|_| "warn".to_string())
}

fn init_logging(level: &str, show_levels: bool) {
    let mut filter = EnvFilter::from_default_env();
    match format!("depmirror={}", level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring invalid log level '{}': {}", level, e),
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(show_levels)
        .with_writer(std::io::stderr)
        .init();
}
