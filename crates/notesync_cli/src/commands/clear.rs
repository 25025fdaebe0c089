//! Clear command implementation.

use super::{open_cache, CommandError};
use std::path::Path;
use tracing::warn;

/// Drops every cached entity and queued mutation. Returns the number of
/// records removed.
pub fn clear(path: &Path, confirmed: bool) -> Result<usize, Box<dyn std::error::Error>> {
    if !confirmed {
        return Err(CommandError::NotConfirmed("clear the cache").into());
    }

    let cache = open_cache(path)?;
    let pending = cache.store.load_queue_items()?.len();
    if pending > 0 {
        warn!(pending, "discarding unsynced changes");
    }

    let removed = cache.store.clear()?;
    cache.backend.compact()?;
    Ok(removed)
}

/// Runs the clear command.
pub fn run(path: &Path, confirmed: bool) -> Result<(), Box<dyn std::error::Error>> {
    let removed = clear(path, confirmed)?;
    println!("✓ Removed {removed} record(s) from {}", path.display());
    Ok(())
}
