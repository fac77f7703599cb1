//! Command-line argument parsing for depmirror
//!
//! Defines the CLI structure using clap derive macros: fetching entries into
//! the cache, reporting verification statistics, and running eviction.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::ConfigOverrides;

/// depmirror - Fetch and verify dependency blobs into a bounded cache
#[derive(Parser, Debug)]
#[command(
    name = "depmirror",
    version,
    about = "Fetch content-addressed dependency blobs into a verified, size-bounded cache",
    long_about = "Downloads dependency blobs with resume and retry, checks every blob against its expected size and SHA-1,
remembers verification results between runs, and evicts least-recently-used files to stay under a budget."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache directory path
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch every entry of an entries file into the cache
    Fetch(FetchArgs),

    /// Show verification statistics without touching the network
    Stats(StatsArgs),

    /// Run one eviction pass against the cache budget
    Evict(EvictArgs),
}

/// Arguments for the fetch command
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// JSON file listing the entries to fetch
    #[arg(value_name = "ENTRIES")]
    pub entries: PathBuf,

    /// Number of concurrent download workers
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Retries per entry after the first attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-request timeout, e.g. "30s"
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Largest slice written between syncs, e.g. "64KB"
    #[arg(long)]
    pub chunk_size: Option<String>,

    /// Maximum cache size, e.g. "100GB" ("0" = unlimited)
    #[arg(long)]
    pub max_cache_size: Option<String>,

    /// Usage percentage at which eviction starts
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub cleanup_threshold: Option<u8>,

    /// Re-hash existing artifacts even when a matching record exists
    #[arg(short, long)]
    pub force_verify: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the stats command
#[derive(Args, Debug, Clone, Default)]
pub struct StatsArgs {
    /// Print statistics as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the evict command
#[derive(Args, Debug, Clone, Default)]
pub struct EvictArgs {
    /// Maximum cache size, e.g. "100GB"
    #[arg(long)]
    pub max_cache_size: Option<String>,

    /// Usage percentage at which eviction starts
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub cleanup_threshold: Option<u8>,

    /// Print the eviction report as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_duration(input: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(input).map_err(|e| e.to_string())
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Logging level selected by verbosity flags, if any
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.global.quiet {
            Some(tracing::Level::ERROR)
        } else if self.global.very_verbose {
            Some(tracing::Level::DEBUG)
        } else if self.global.verbose {
            Some(tracing::Level::INFO)
        } else {
            None
        }
    }
}

impl FetchArgs {
    /// Check argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == Some(0) {
            return Err("Number of workers must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Configuration overrides from these flags and the global ones
    pub fn overrides(&self, global: &GlobalArgs) -> ConfigOverrides {
        ConfigOverrides {
            cache_root: global.cache_dir.clone(),
            max_cache_size: self.max_cache_size.clone(),
            cleanup_threshold: self.cleanup_threshold,
            workers: self.workers,
            max_retries: self.max_retries,
            request_timeout: self.timeout,
            chunk_size: self.chunk_size.clone(),
            force_verify: self.force_verify,
        }
    }
}

impl EvictArgs {
    /// Configuration overrides from these flags and the global ones
    pub fn overrides(&self, global: &GlobalArgs) -> ConfigOverrides {
        ConfigOverrides {
            cache_root: global.cache_dir.clone(),
            max_cache_size: self.max_cache_size.clone(),
            cleanup_threshold: self.cleanup_threshold,
            ..Default::default()
        }
    }
}
