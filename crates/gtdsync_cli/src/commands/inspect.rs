//! Inspect command implementation.

use super::open_existing;
use gtdsync_store::LocalStore;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Identifier of the device owning the store.
    pub device_id: String,
    /// Whether a change cursor is stored.
    pub has_cursor: bool,
    /// Unix seconds of the last successful sync.
    pub last_sync_at: Option<i64>,
    /// Live rows across all kinds.
    pub live: usize,
    /// Tombstones across all kinds.
    pub tombstones: usize,
    /// Rows awaiting push across all kinds.
    pub pending: usize,
    /// Per-kind breakdown.
    pub kinds: Vec<KindStats>,
}

/// Counts for a single record kind.
#[derive(Debug, Serialize)]
pub struct KindStats {
    /// Remote record type.
    pub kind: String,
    /// Live rows.
    pub live: usize,
    /// Tombstoned rows.
    pub tombstones: usize,
    /// Rows awaiting push.
    pub pending: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let result = collect(&store, path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers counts and metadata from an open store.
pub fn collect(store: &LocalStore, path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let metadata = store.metadata()?;
    let kinds: Vec<KindStats> = store
        .counts()?
        .into_iter()
        .map(|counts| KindStats {
            kind: counts.kind.to_string(),
            live: counts.live,
            tombstones: counts.tombstones,
            pending: counts.pending,
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        device_id: metadata.device_id,
        has_cursor: metadata.cursor.is_some(),
        last_sync_at: metadata.last_sync_at,
        live: kinds.iter().map(|k| k.live).sum(),
        tombstones: kinds.iter().map(|k| k.tombstones).sum(),
        pending: kinds.iter().map(|k| k.pending).sum(),
        kinds,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("gtdsync Store Inspection");
    println!("========================");
    println!();
    println!("Path:      {}", result.path);
    println!("Device:    {}", result.device_id);
    println!(
        "Cursor:    {}",
        if result.has_cursor { "present" } else { "none (next sync is a full resync)" }
    );
    match result.last_sync_at {
        Some(at) => println!("Last sync: {at}"),
        None => println!("Last sync: never"),
    }
    println!();
    println!("Rows:");
    println!("  {:<14} {:>8} {:>11} {:>8}", "kind", "live", "tombstones", "pending");
    for kind in &result.kinds {
        println!(
            "  {:<14} {:>8} {:>11} {:>8}",
            kind.kind, kind.live, kind.tombstones, kind.pending
        );
    }
    println!(
        "  {:<14} {:>8} {:>11} {:>8}",
        "total", result.live, result.tombstones, result.pending
    );
}
