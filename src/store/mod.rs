// ABOUTME: Store-adapter contract consumed by the reconciliation engine
// ABOUTME: Defines the Store trait, locators, connection modes, and StoreError

pub mod postgres;
pub mod sqlite;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::row::{Row, Value};

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Errors surfaced by store drivers.
///
/// Drivers never panic or swallow failures; every call returns a
/// `StoreResult` that the engine matches on at each stage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot connect to {locator}: {reason}")]
    Connectivity { locator: String, reason: String },

    #[error("failed to query table '{table}': {reason}")]
    Query { table: String, reason: String },

    #[error("failed to write to table '{table}': {reason}")]
    Write { table: String, reason: String },

    #[error("failed to execute DDL: {reason}")]
    Ddl { reason: String },

    #[error("invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("cannot store value '{value}' in column '{column}' of type {data_type}")]
    Conversion {
        column: String,
        data_type: String,
        value: String,
    },
}

impl StoreError {
    /// Whether a query failed because the table does not exist.
    pub fn is_missing_table(&self) -> bool {
        match self {
            StoreError::Query { reason, .. } => {
                reason.contains("no such table") || reason.contains("does not exist")
            }
            _ => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// SQL flavour spoken by a store, used where DDL differs between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

/// Whether a store must already exist when it is opened.
///
/// The primary store is a precondition of every run; the secondary store is
/// created on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    MustExist,
    CreateIfMissing,
}

/// A connected row store.
///
/// All calls block until the underlying driver returns. Each successful
/// write commits on its own; there is no transaction spanning calls.
pub trait Store {
    fn dialect(&self) -> Dialect;

    /// Read every column of every row of `table`.
    fn query(&mut self, table: &str) -> StoreResult<Vec<Row>>;

    /// Insert `row`, or replace the fields of the existing row whose
    /// `key_field` matches. Repeating the call is a no-op.
    fn upsert(&mut self, table: &str, key_field: &str, row: &Row) -> StoreResult<()>;

    /// Plain insert. A duplicate key is an error.
    fn insert(&mut self, table: &str, row: &Row) -> StoreResult<()>;

    /// Set `fields` on the row whose `key_field` equals `key_value`.
    ///
    /// Fails when no row matches.
    fn update(
        &mut self,
        table: &str,
        key_field: &str,
        key_value: &Value,
        fields: &Row,
    ) -> StoreResult<()>;

    fn execute_ddl(&mut self, statement: &str) -> StoreResult<()>;

    fn close(self: Box<Self>) -> StoreResult<()>;
}

/// Opens stores from configuration locators.
///
/// The orchestrator only talks to stores through this trait, so embedders
/// and tests can supply their own drivers.
pub trait StoreConnector {
    fn connect(&self, locator: &str, mode: ConnectMode) -> StoreResult<Box<dyn Store>>;
}

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocator {
    Sqlite(PathBuf),
    Postgres(String),
}

impl StoreLocator {
    /// Parse a locator string.
    ///
    /// `postgres://` and `postgresql://` URLs select PostgreSQL. Anything else
    /// is a SQLite file path, optionally prefixed with `sqlite:` or `sqlite://`.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StoreError::Connectivity {
                locator: "<empty>".to_string(),
                reason: "store locator is not configured".to_string(),
            });
        }

        if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            return Ok(StoreLocator::Postgres(trimmed.to_string()));
        }

        let path = trimmed
            .strip_prefix("sqlite://")
            .or_else(|| trimmed.strip_prefix("sqlite:"))
            .unwrap_or(trimmed);
        if path.is_empty() {
            return Err(StoreError::Connectivity {
                locator: trimmed.to_string(),
                reason: "SQLite locator has no file path".to_string(),
            });
        }
        Ok(StoreLocator::Sqlite(PathBuf::from(path)))
    }
}

impl fmt::Display for StoreLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocator::Sqlite(path) => write!(f, "sqlite:{}", path.display()),
            StoreLocator::Postgres(url) => f.write_str(&crate::utils::redact_locator(url)),
        }
    }
}

/// Connector for the built-in SQLite and PostgreSQL drivers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

impl StoreConnector for DefaultConnector {
    fn connect(&self, locator: &str, mode: ConnectMode) -> StoreResult<Box<dyn Store>> {
        match StoreLocator::parse(locator)? {
            StoreLocator::Sqlite(path) => Ok(Box::new(SqliteStore::open(&path, mode)?)),
            StoreLocator::Postgres(url) => Ok(Box::new(PostgresStore::connect(&url)?)),
        }
    }
}
