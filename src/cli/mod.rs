//! Command-line interface components
//!
//! Argument parsing, the fetch progress bar and the subcommand handlers.

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{Cli, Commands, EvictArgs, FetchArgs, GlobalArgs, StatsArgs};
pub use commands::{handle_evict, handle_fetch, handle_stats};
pub use progress::FetchProgress;
