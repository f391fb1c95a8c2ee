//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Number of live records.
    pub record_count: usize,
    /// Superseded frames still in the journal.
    pub dead_frames: usize,
    /// Dead-frame count that triggers automatic compaction.
    pub compact_threshold: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(path)?;
    let result = InspectResult {
        path: path.display().to_string(),
        journal_size: store.journal_size(),
        record_count: store.len(),
        dead_frames: store.dead_frames(),
        compact_threshold: store.config().compact_threshold,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();
    println!("  Journal size:      {} bytes", result.journal_size);
    println!("  Records:           {}", result.record_count);
    println!(
        "  Dead frames:       {} (compacts at {})",
        result.dead_frames, result.compact_threshold
    );
}
