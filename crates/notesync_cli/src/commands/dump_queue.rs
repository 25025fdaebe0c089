//! Dump queue command implementation.

use super::open_cache;
use crate::OutputFormat;
use notesync_protocol::{PendingQueue, SyncQueueItem};
use std::path::Path;

/// Loads pending mutations in the order a drain pass would send them.
pub fn read_queue(
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<SyncQueueItem>, Box<dyn std::error::Error>> {
    let cache = open_cache(path)?;
    let queue = PendingQueue::from_items(cache.store.load_queue_items()?);

    Ok(queue
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect())
}

/// Runs the dump-queue command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let items = read_queue(path, limit)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => print_text_output(&items),
    }
    Ok(())
}

fn print_text_output(items: &[SyncQueueItem]) {
    if items.is_empty() {
        println!("Sync queue is empty");
        return;
    }

    println!(
        "{:<6} {:<8} {:<8} {:<24} {:<7} {}",
        "POS", "OP", "TYPE", "ENTITY", "RETRIES", "QUEUED AT"
    );
    for item in items {
        println!(
            "{:<6} {:<8} {:<8} {:<24} {:<7} {}",
            item.position,
            item.operation,
            item.entity_type,
            item.entity_id,
            item.retry_count,
            item.enqueued_at.to_rfc3339(),
        );
    }
    println!();
    println!("{} item(s)", items.len());
}
