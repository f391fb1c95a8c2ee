//! Compact command implementation.

use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(path)?;

    println!("Compacting journal at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("  Records:      {}", store.len());
    println!("  Dead frames:  {}", store.dead_frames());
    println!("  Size before:  {} bytes", store.journal_size());

    if dry_run {
        return Ok(());
    }
    if store.dead_frames() == 0 {
        println!();
        println!("No compaction needed - journal is already minimal");
        return Ok(());
    }

    let stats = store.compact()?;
    println!("  Size after:   {} bytes", stats.bytes_after);
    println!(
        "  Space saved:  {} bytes",
        stats.bytes_before.saturating_sub(stats.bytes_after)
    );
    println!("✓ Compaction complete");
    Ok(())
}
