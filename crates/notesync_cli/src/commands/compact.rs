//! Compact command implementation.

use super::{format_size, open_cache};
use notesync_storage::LogStats;
use std::path::Path;

/// Compaction statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    /// Figures before the rewrite.
    pub before: LogStats,
    /// Figures after the rewrite.
    pub after: LogStats,
}

impl CompactStats {
    /// Bytes reclaimed by the rewrite.
    pub fn saved(&self) -> u64 {
        self.before.file_size.saturating_sub(self.after.file_size)
    }
}

/// Rewrites the cache log so it only holds live keys.
pub fn compact(path: &Path) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let cache = open_cache(path)?;
    let before = cache.backend.stats();
    let after = cache.backend.compact()?;
    Ok(CompactStats { before, after })
}

/// Runs the compact command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting cache at {}", path.display());
    let stats = compact(path)?;

    println!();
    println!("  Live keys:      {}", stats.after.live_keys);
    println!("  Dead records:   {} removed", stats.before.dead_records);
    println!("  Size before:    {}", format_size(stats.before.file_size));
    println!("  Size after:     {}", format_size(stats.after.file_size));
    println!(
        "  Space saved:    {} ({:.1}%)",
        format_size(stats.saved()),
        if stats.before.file_size > 0 {
            stats.saved() as f64 / stats.before.file_size as f64 * 100.0
        } else {
            0.0
        }
    );
    println!();
    println!("✓ Compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::dump_queue::read_queue;
    use crate::commands::fixtures::populate;
    use crate::commands::inspect::inspect;

    #[test]
    fn reclaims_dead_records_and_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path());

        let stats = compact(dir.path()).unwrap();

        assert!(stats.before.dead_records >= 3);
        assert_eq!(stats.after.dead_records, 0);
        assert_eq!(stats.after.live_keys, stats.before.live_keys);
        assert!(stats.saved() > 0);

        let result = inspect(dir.path()).unwrap();
        assert_eq!(result.queue_length, 2);
        assert_eq!(read_queue(dir.path(), None).unwrap()[1].entity_id, "p1");
    }
}
