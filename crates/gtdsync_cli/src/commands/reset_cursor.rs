//! Reset-cursor command implementation.

use super::open_existing;
use std::path::Path;

/// Runs the reset-cursor command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    if store.metadata()?.cursor.is_none() {
        println!("No cursor stored; the next sync is already a full resync");
        return Ok(());
    }
    store.reset_cursor()?;
    println!("✓ Cursor cleared; the next sync replaces all confirmed rows");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtdsync_store::{metadata, LocalStore};

    #[test]
    fn clears_a_saved_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gtd.sqlite");
        {
            let store = LocalStore::open(&path).unwrap();
            store.write(|tx| metadata::save_cursor(tx, b"page-7")).unwrap();
        }

        run(&path).unwrap();

        let store = LocalStore::open(&path).unwrap();
        assert_eq!(store.metadata().unwrap().cursor, None);
    }
}
