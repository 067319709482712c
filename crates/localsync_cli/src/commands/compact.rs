//! Compact command implementation.

use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(path)?;

    println!("Compacting store log at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let bytes_before = store.log_size();
    println!("  Dead records: {}", store.dead_records());
    println!("  Size before:  {bytes_before} bytes");

    if dry_run {
        return Ok(());
    }

    let reclaimed = store.compact()?;
    let bytes_after = store.log_size();
    tracing::info!(path = %path.display(), reclaimed, "compacted store log");

    println!("  Size after:   {bytes_after} bytes");
    println!(
        "  Space saved:  {} bytes ({:.1}%)",
        reclaimed,
        if bytes_before > 0 {
            (reclaimed as f64 / bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );

    Ok(())
}
