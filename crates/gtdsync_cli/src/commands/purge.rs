//! Purge command implementation.

use super::open_existing;
use gtdsync_store::{LocalStore, PurgeReport, SoftDeleteService};
use std::path::Path;
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Runs the purge command.
pub fn run(path: &Path, retention_days: u64) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    println!("Purging tombstones older than {retention_days} days at {:?}", path);
    println!();

    let report = purge(&store, retention_days)?;

    println!("Removed:");
    println!("  Items:          {}", report.items);
    println!("  Tags:           {}", report.tags);
    println!("  Item tags:      {}", report.item_tags);
    println!("  Time entries:   {}", report.time_entries);
    println!("  Saved searches: {}", report.saved_searches);
    println!();
    if report.total() == 0 {
        println!("Nothing eligible for purge");
    } else {
        println!("✓ Purged {} tombstones", report.total());
    }

    Ok(())
}

/// Purges tombstones older than `retention_days` as of the store's clock.
pub fn purge(store: &LocalStore, retention_days: u64) -> Result<PurgeReport, Box<dyn std::error::Error>> {
    let retention = Duration::from_secs(retention_days.saturating_mul(SECONDS_PER_DAY));
    let service = SoftDeleteService::new().with_retention(retention);
    Ok(service.purge(store, store.clock().now())?)
}
