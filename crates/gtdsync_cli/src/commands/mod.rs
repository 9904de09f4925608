//! CLI command implementations.

pub mod inspect;
pub mod purge;
pub mod reset_cursor;

use gtdsync_store::LocalStore;
use std::path::Path;
use tracing::debug;

/// Opens a store file, refusing to create one.
pub(crate) fn open_existing(path: &Path) -> Result<LocalStore, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let store = LocalStore::open(path)?;
    debug!(path = %path.display(), device_id = store.device_id(), "opened store");
    Ok(store)
}
