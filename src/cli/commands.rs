//! Command handlers for the depmirror CLI
//!
//! Each handler loads the layered configuration, applies the flags of its
//! subcommand and drives the library. Output goes to stdout as either a text
//! summary or JSON; logs go through tracing.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::app::cache::{CacheLock, EvictionManager, InFlightRegistry};
use crate::app::records::{RecordStore, StoreStats};
use crate::app::{load_entries, Coordinator};
use crate::cli::{EvictArgs, FetchArgs, FetchProgress, GlobalArgs, StatsArgs};
use crate::config::{AppConfig, ConfigOverrides};
use crate::constants::RECORD_STORE_FILE;
use crate::errors::{AppError, CacheError, Result};

/// Handle the fetch command
///
/// Loads the entries file, runs every entry to a terminal outcome and prints
/// the run report. Fails with [`AppError::EntriesFailed`] when any entry did
/// not end valid so scripts can rely on the exit status.
pub async fn handle_fetch(args: FetchArgs, global: &GlobalArgs) -> Result<()> {
    args.validate().map_err(AppError::generic)?;

    let config = load_config(global, &args.overrides(global)).await?;
    let runtime = config.to_runtime_config()?.with_signal_handling(true);
    let concurrency = runtime.worker.worker_count;

    let entries = load_entries(&args.entries).await?;
    info!(
        "Loaded {} entries from {}",
        entries.len(),
        args.entries.display()
    );

    let coordinator = Coordinator::new(runtime)?;
    let mut progress = FetchProgress::new(entries.len(), !global.quiet && !args.json);

    let result = coordinator
        .process_with(entries, concurrency, |report| progress.record(report))
        .await;
    progress.finish();
    let report = result?;

    if args.json {
        print_json(&report)?;
    } else if !global.quiet || report.has_failures() {
        println!("{}", report.summary());
    }

    if report.cancelled {
        return Err(AppError::generic("Fetch interrupted before all entries finished"));
    }
    if report.has_failures() {
        return Err(AppError::EntriesFailed {
            failed: report.counts.failed(),
            total: report.total_entries,
        });
    }
    Ok(())
}

/// Handle the stats command
///
/// Reads the record store and scans the cache root. Nothing is written, so
/// the command is safe to run beside a fetch in progress.
pub async fn handle_stats(args: StatsArgs, global: &GlobalArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        cache_root: global.cache_dir.clone(),
        ..Default::default()
    };
    let config = load_config(global, &overrides).await?;
    let cache_root = config.cache.cache_root.clone();
    ensure_cache_root(&cache_root)?;

    let store = Arc::new(RecordStore::open(&cache_root)?);
    let stats = RecordStore::blocking(&store, |store| store.stats()).await?;

    if args.json {
        print_json(&stats)?;
    } else {
        print_stats(&cache_root, &stats);
    }
    Ok(())
}

/// Handle the evict command
///
/// Runs one eviction pass against the configured budget outside of a fetch.
/// Holds the cache lock for the pass, so it fails instead of evicting while
/// a fetch owns the cache root.
pub async fn handle_evict(args: EvictArgs, global: &GlobalArgs) -> Result<()> {
    let config = load_config(global, &args.overrides(global)).await?;
    let cache = config.cache_config()?;
    ensure_cache_root(&cache.cache_root)?;
    let _lock = CacheLock::acquire(&cache.cache_root)?;

    let store = Arc::new(RecordStore::open(&cache.cache_root)?);
    let manager = EvictionManager::new(
        &cache.cache_root,
        Arc::clone(&store),
        InFlightRegistry::new(),
    )
    .with_target_pct(cache.eviction_target_pct);

    let report = manager
        .enforce_limit(cache.max_cache_size, cache.cleanup_threshold_pct)
        .await?;
    RecordStore::blocking(&store, |store| store.flush()).await?;

    if args.json {
        print_json(&report)?;
    } else if cache.max_cache_size == 0 {
        println!("Cache size is unlimited, nothing to evict");
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

async fn load_config(global: &GlobalArgs, overrides: &ConfigOverrides) -> Result<AppConfig> {
    let mut config = AppConfig::load(global.config.as_deref()).await?;
    config.apply_overrides(overrides);
    debug!("Effective configuration: {:?}", config);
    Ok(config)
}

fn ensure_cache_root(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(CacheError::DirectoryNotAccessible {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::generic(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn print_stats(cache_root: &Path, stats: &StoreStats) {
    println!("📊 Cache Statistics");
    println!("===================");
    println!("Cache root:           {}", cache_root.display());
    println!(
        "Record store:         {} ({})",
        RECORD_STORE_FILE,
        indicatif::HumanBytes(stats.database_size_bytes)
    );
    println!();
    println!("Verified records:     {}", stats.total);
    println!("  Valid:              {}", stats.valid);
    println!("  Hash mismatch:      {}", stats.mismatched);
    println!("  Corrupt:            {}", stats.corrupt);
    println!("Never verified:       {}", stats.never_verified);
    println!("Stale records:        {}", stats.stale);
    println!("Partial files:        {}", stats.partial_files);
    println!("Verified today:       {}", stats.recent_verifications);
}
