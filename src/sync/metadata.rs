// ABOUTME: Tracks the outcome of the latest run per database in the secondary store
// ABOUTME: One sync_metadata row per database, overwritten on every run

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::row::{Row, Value};
use crate::store::{Dialect, Store, StoreResult};

pub const METADATA_TABLE: &str = "sync_metadata";

/// Which way data was allowed to flow in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    PrimaryToSecondary,
    SecondaryToPrimary,
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::PrimaryToSecondary => "primary_to_secondary",
            SyncDirection::SecondaryToPrimary => "secondary_to_primary",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    Failure,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted outcome of the latest run for one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncMetadataRecord {
    pub database_name: String,
    /// RFC 3339 UTC timestamp of the run
    pub last_sync_timestamp: String,
    pub sync_direction: String,
    pub sync_status: String,
}

impl SyncMetadataRecord {
    fn to_row(&self) -> Row {
        let mut row = Row::with_capacity(4);
        row.insert("database_name", self.database_name.as_str());
        row.insert("last_sync_timestamp", self.last_sync_timestamp.as_str());
        row.insert("sync_direction", self.sync_direction.as_str());
        row.insert("sync_status", self.sync_status.as_str());
        row
    }

    fn from_row(row: &Row) -> Option<Self> {
        let text = |field: &str| match row.get(field) {
            Some(Value::Null) | None => String::new(),
            Some(value) => value.to_string(),
        };
        let database_name = text("database_name");
        if database_name.is_empty() {
            return None;
        }
        Some(Self {
            database_name,
            last_sync_timestamp: text("last_sync_timestamp"),
            sync_direction: text("sync_direction"),
            sync_status: text("sync_status"),
        })
    }
}

fn metadata_ddl(dialect: Dialect) -> String {
    let id_column = match dialect {
        Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            {},
            database_name TEXT NOT NULL UNIQUE,
            last_sync_timestamp TEXT NOT NULL,
            sync_direction TEXT NOT NULL,
            sync_status TEXT NOT NULL
        )",
        METADATA_TABLE, id_column
    )
}

/// Create the metadata table if it does not exist yet.
pub fn ensure_metadata_table(store: &mut dyn Store) -> StoreResult<()> {
    let ddl = metadata_ddl(store.dialect());
    store.execute_ddl(&ddl)
}

/// Replace the tracking record for `database_name` with the current time.
pub fn record(
    store: &mut dyn Store,
    database_name: &str,
    direction: SyncDirection,
    status: SyncStatus,
) -> StoreResult<SyncMetadataRecord> {
    ensure_metadata_table(store)?;

    let record = SyncMetadataRecord {
        database_name: database_name.to_string(),
        last_sync_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        sync_direction: direction.to_string(),
        sync_status: status.to_string(),
    };
    store.upsert(METADATA_TABLE, "database_name", &record.to_row())?;

    tracing::debug!(
        "Recorded {} {} sync for '{}' at {}",
        record.sync_status,
        record.sync_direction,
        database_name,
        record.last_sync_timestamp
    );
    Ok(record)
}

/// Read the tracking record for `database_name`, if a run was ever recorded.
///
/// Never creates the metadata table; a store without one has no record.
pub fn load(store: &mut dyn Store, database_name: &str) -> StoreResult<Option<SyncMetadataRecord>> {
    let rows = match store.query(METADATA_TABLE) {
        Ok(rows) => rows,
        Err(e) if e.is_missing_table() => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(rows
        .iter()
        .filter_map(SyncMetadataRecord::from_row)
        .find(|record| record.database_name == database_name))
}
