//! Inspect command implementation.

use super::{format_size, open_cache};
use crate::OutputFormat;
use notesync_protocol::EntityType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Cache inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// Cache directory.
    pub path: String,
    /// Log file size in bytes.
    pub file_size: u64,
    /// Live keys in the log.
    pub live_keys: usize,
    /// Superseded records a compaction would drop.
    pub dead_records: usize,
    /// Cached entities per type, across all identities.
    pub entities: BTreeMap<EntityType, usize>,
    /// Pending mutations.
    pub queue_length: usize,
    /// Pending mutations that failed at least once.
    pub failing: usize,
}

/// Gathers the inspection figures for a cache directory.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let cache = open_cache(path)?;
    let stats = cache.backend.stats();
    let queue = cache.store.load_queue_items()?;

    let mut entities = cache.store.entity_counts()?;
    for entity_type in EntityType::ALL {
        entities.entry(entity_type).or_insert(0);
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size: stats.file_size,
        live_keys: stats.live_keys,
        dead_records: stats.dead_records,
        entities,
        queue_length: queue.len(),
        failing: queue.iter().filter(|item| item.retry_count > 0).count(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("NoteSync Offline Cache");
    println!("======================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Log size:      {}", format_size(result.file_size));
    println!("  Live keys:     {}", result.live_keys);
    println!("  Dead records:  {}", result.dead_records);
    println!();
    println!("Entities:");
    for (entity_type, count) in &result.entities {
        println!("  {:<12} {}", format!("{entity_type}:"), count);
    }
    println!();
    println!("Sync queue:");
    println!("  Pending:       {}", result.queue_length);
    println!("  Failing:       {}", result.failing);
}
