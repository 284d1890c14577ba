// ABOUTME: Status command - shows the last recorded run for each database
// ABOUTME: Reads sync_metadata from each secondary store without creating it

use std::path::Path;

use anyhow::Result;

use super::run::load_batch;
use crate::store::{ConnectMode, DefaultConnector, StoreConnector};
use crate::sync::metadata;

pub fn status(config_path: &Path, databases: Option<Vec<String>>) -> Result<()> {
    let (_, batch) = load_batch(config_path, databases.as_deref())?;

    for database in &batch {
        let mut store = match DefaultConnector.connect(&database.secondary, ConnectMode::MustExist)
        {
            Ok(store) => store,
            Err(e) => {
                tracing::debug!("Secondary store for '{}' unavailable: {}", database.name, e);
                println!("{}: never synced (secondary store not found)", database.name);
                continue;
            }
        };

        match metadata::load(store.as_mut(), &database.name) {
            Ok(Some(record)) => println!(
                "{}: {} {} at {}",
                database.name,
                record.sync_status,
                record.sync_direction,
                record.last_sync_timestamp
            ),
            Ok(None) => println!("{}: never synced", database.name),
            Err(e) => println!("{}: status unavailable: {}", database.name, e),
        }

        if let Err(e) = store.close() {
            tracing::warn!("Failed to close secondary store for '{}': {}", database.name, e);
        }
    }

    Ok(())
}
