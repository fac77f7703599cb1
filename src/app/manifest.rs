//! Entries file loading
//!
//! The upstream dependency manifest is parsed elsewhere; this module reads the
//! hand-off format, a JSON array of [`DependencyEntry`] objects, and rejects
//! anything the pipeline could not process safely.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info};

use crate::app::models::DependencyEntry;
use crate::errors::{ManifestError, ManifestResult};

/// Load and validate entries from a JSON file
///
/// # Arguments
///
/// * `path` - Path to a JSON array of entries
///
/// # Errors
///
/// Returns `ManifestError` if the file is missing or malformed, if any entry
/// fails validation, or if two entries share a local path.
pub async fn load_entries(path: &Path) -> ManifestResult<Vec<DependencyEntry>> {
    if !path.exists() {
        return Err(ManifestError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let content = tokio::fs::read_to_string(path).await?;
    let entries = parse_entries(&content)?;
    info!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Parse and validate entries from JSON text
pub fn parse_entries(content: &str) -> ManifestResult<Vec<DependencyEntry>> {
    let entries: Vec<DependencyEntry> = serde_json::from_str(content)?;
    validate_entries(&entries)?;
    Ok(entries)
}

/// Validate every entry and enforce unique local paths
pub fn validate_entries(entries: &[DependencyEntry]) -> ManifestResult<()> {
    let mut seen = HashSet::with_capacity(entries.len());

    for entry in entries {
        entry.validate()?;

        let key = entry.record_key();
        if !seen.insert(key.clone()) {
            return Err(ManifestError::DuplicateEntry { path: key });
        }
    }

    debug!("Validated {} entries", entries.len());
    Ok(())
}
