// ABOUTME: SQLite store driver built on rusqlite
// ABOUTME: Reads whole tables into typed rows and applies keyed writes

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use super::{ConnectMode, Dialect, Store, StoreError, StoreResult};
use crate::row::{format_timestamp, parse_date, parse_timestamp, Row, Value};
use crate::utils::{quote_column, quote_table, split_table_name};

/// A SQLite database file.
pub struct SqliteStore {
    path: PathBuf,
    conn: Connection,
}

impl SqliteStore {
    /// Open a SQLite database file.
    ///
    /// With [`ConnectMode::MustExist`] a missing file is a connectivity error
    /// and nothing is created on disk. With [`ConnectMode::CreateIfMissing`]
    /// the file and its parent directories are created.
    pub fn open(path: &Path, mode: ConnectMode) -> StoreResult<Self> {
        let connectivity = |reason: String| StoreError::Connectivity {
            locator: format!("sqlite:{}", path.display()),
            reason,
        };

        match mode {
            ConnectMode::MustExist => {
                if !path.is_file() {
                    return Err(connectivity("database file does not exist".to_string()));
                }
            }
            ConnectMode::CreateIfMissing => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            connectivity(format!(
                                "failed to create directory {}: {}",
                                parent.display(),
                                e
                            ))
                        })?;
                    }
                }
                if !path.exists() {
                    tracing::info!("Creating SQLite database at {}", path.display());
                }
            }
        }

        let conn = Connection::open(path).map_err(|e| connectivity(e.to_string()))?;
        tracing::debug!("Opened SQLite database {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declared column types, keyed by column name.
    fn declared_types(&self, table: &str) -> StoreResult<HashMap<String, String>> {
        let query_error = |e: rusqlite::Error| StoreError::Query {
            table: table.to_string(),
            reason: e.to_string(),
        };

        let (schema, name) = split_table_name(table)?;
        let mut stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1, ?2)")
            .map_err(query_error)?;
        let types = stmt
            .query_map(
                rusqlite::params![name, schema.unwrap_or("main")],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .map_err(query_error)?
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(query_error)?;
        Ok(types)
    }

    fn row_exists(&self, table: &str, key_field: &str, key_value: &Value) -> StoreResult<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
            quote_table(table)?,
            quote_column(key_field)?
        );
        self.conn
            .query_row(&sql, [to_sqlite_value(key_value)], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| write_error(table, e))
    }

    fn update_rows(
        &self,
        table: &str,
        key_field: &str,
        key_value: &Value,
        fields: &Row,
    ) -> StoreResult<usize> {
        let assignments = fields
            .columns()
            .enumerate()
            .map(|(idx, column)| Ok(format!("{} = ?{}", quote_column(column)?, idx + 1)))
            .collect::<StoreResult<Vec<_>>>()?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_table(table)?,
            assignments.join(", "),
            quote_column(key_field)?,
            fields.len() + 1
        );

        let params = fields
            .iter()
            .map(|(_, value)| to_sqlite_value(value))
            .chain(std::iter::once(to_sqlite_value(key_value)));

        self.conn
            .execute(&sql, params_from_iter(params))
            .map_err(|e| write_error(table, e))
    }
}

impl Store for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, table: &str) -> StoreResult<Vec<Row>> {
        let query_error = |e: rusqlite::Error| StoreError::Query {
            table: table.to_string(),
            reason: e.to_string(),
        };

        let declared = self.declared_types(table)?;
        let sql = format!("SELECT * FROM {}", quote_table(table)?);
        let mut stmt = self.conn.prepare(&sql).map_err(query_error)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt
            .query_map([], |row| {
                let mut out = Row::with_capacity(column_names.len());
                for (idx, name) in column_names.iter().enumerate() {
                    let raw: SqliteValue = row.get(idx)?;
                    let declared_type = declared.get(name).map(String::as_str);
                    out.insert(name.clone(), from_sqlite_value(raw, declared_type));
                }
                Ok(out)
            })
            .map_err(query_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;

        tracing::debug!(
            "Read {} rows from SQLite table '{}' ({})",
            rows.len(),
            table,
            self.path.display()
        );
        Ok(rows)
    }

    fn upsert(&mut self, table: &str, key_field: &str, row: &Row) -> StoreResult<()> {
        let key_value = row.get(key_field).ok_or_else(|| StoreError::Write {
            table: table.to_string(),
            reason: format!("row has no value for key field '{}'", key_field),
        })?;

        if !self.row_exists(table, key_field, key_value)? {
            return self.insert(table, row);
        }

        let fields = row.without(key_field);
        if fields.is_empty() {
            return Ok(());
        }
        self.update_rows(table, key_field, key_value, &fields)?;
        Ok(())
    }

    fn insert(&mut self, table: &str, row: &Row) -> StoreResult<()> {
        if row.is_empty() {
            return Err(StoreError::Write {
                table: table.to_string(),
                reason: "cannot insert an empty row".to_string(),
            });
        }

        let columns = row
            .columns()
            .map(quote_column)
            .collect::<StoreResult<Vec<_>>>()?;
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_table(table)?,
            columns.join(", "),
            placeholders.join(", ")
        );

        self.conn
            .execute(&sql, params_from_iter(row.iter().map(|(_, v)| to_sqlite_value(v))))
            .map_err(|e| write_error(table, e))?;
        Ok(())
    }

    fn update(
        &mut self,
        table: &str,
        key_field: &str,
        key_value: &Value,
        fields: &Row,
    ) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let changed = self.update_rows(table, key_field, key_value, fields)?;
        if changed == 0 {
            return Err(StoreError::Write {
                table: table.to_string(),
                reason: format!("no row with {} = {}", key_field, key_value),
            });
        }
        Ok(())
    }

    fn execute_ddl(&mut self, statement: &str) -> StoreResult<()> {
        self.conn
            .execute_batch(statement)
            .map_err(|e| StoreError::Ddl {
                reason: e.to_string(),
            })
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        let SqliteStore { path, conn } = *self;
        conn.close().map_err(|(_, e)| StoreError::Connectivity {
            locator: format!("sqlite:{}", path.display()),
            reason: format!("failed to close database: {}", e),
        })
    }
}

fn write_error(table: &str, e: rusqlite::Error) -> StoreError {
    StoreError::Write {
        table: table.to_string(),
        reason: e.to_string(),
    }
}

fn is_temporal(declared_type: &str) -> bool {
    let upper = declared_type.to_ascii_uppercase();
    upper.contains("DATE") || upper.contains("TIME")
}

fn is_boolean(declared_type: &str) -> bool {
    declared_type.to_ascii_uppercase().contains("BOOL")
}

/// Convert a raw SQLite value into a typed [`Value`].
///
/// SQLite has no native boolean or timestamp storage class, so the column's
/// declared type decides: integers in BOOL columns become `Bool`, parseable
/// text in DATE/TIME columns becomes `Date` when it is a bare date and
/// `Timestamp` otherwise. BLOBs surface as base64 text.
fn from_sqlite_value(raw: SqliteValue, declared_type: Option<&str>) -> Value {
    match raw {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => match declared_type {
            Some(t) if is_boolean(t) => Value::Bool(i != 0),
            _ => Value::Int(i),
        },
        SqliteValue::Real(f) => Value::Float(f),
        SqliteValue::Text(s) => match declared_type {
            Some(t) if is_temporal(t) => parse_date(&s)
                .map(Value::Date)
                .or_else(|| parse_timestamp(&s).map(Value::Timestamp))
                .unwrap_or(Value::Text(s)),
            _ => Value::Text(s),
        },
        SqliteValue::Blob(b) => Value::Text(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b,
        )),
    }
}

fn to_sqlite_value(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Int(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Timestamp(ts) => SqliteValue::Text(format_timestamp(ts)),
        Value::Date(_) => SqliteValue::Text(value.to_string()),
    }
}
