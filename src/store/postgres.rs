// ABOUTME: PostgreSQL store driver built on tokio-postgres
// ABOUTME: Blocks on a private runtime so the reconciliation engine stays synchronous

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::runtime::Runtime;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Client;

use super::{Dialect, Store, StoreError, StoreResult};
use crate::row::{Row, Value};
use crate::utils::{quote_column, quote_ident, quote_table, redact_locator, split_table_name};

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Column types read natively; every other type is selected as `::text`.
const NATIVE_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "bigint",
    "real",
    "double precision",
    "numeric",
    "boolean",
    "text",
    "character varying",
    "character",
    "timestamp without time zone",
    "timestamp with time zone",
    "date",
    "json",
    "jsonb",
];

/// A PostgreSQL database.
///
/// tokio-postgres is async; the store owns a current-thread runtime and
/// blocks on every call. The connection task only makes progress while a
/// call is blocked on the runtime, which is the only time it is needed.
pub struct PostgresStore {
    runtime: Runtime,
    client: Client,
    locator: String,
    /// (column_name, data_type) per table, in ordinal order
    columns: HashMap<String, Vec<(String, String)>>,
}

impl PostgresStore {
    /// Connect to a PostgreSQL URL. TLS is negotiated through native-tls
    /// according to the URL's `sslmode`.
    pub fn connect(url: &str) -> StoreResult<Self> {
        let locator = redact_locator(url);
        let connectivity = |reason: String| StoreError::Connectivity {
            locator: locator.clone(),
            reason,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| connectivity(format!("failed to start runtime: {}", e)))?;

        let connector = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| connectivity(format!("failed to build TLS connector: {}", e)))?;
        let tls = postgres_native_tls::MakeTlsConnector::new(connector);

        let (client, connection) = runtime
            .block_on(tokio_postgres::connect(url, tls))
            .map_err(|e| connectivity(describe(&e)))?;

        let task_locator = locator.clone();
        runtime.spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection to {} failed: {}", task_locator, e);
            }
        });

        tracing::debug!("Connected to PostgreSQL at {}", locator);

        Ok(Self {
            runtime,
            client,
            locator,
            columns: HashMap::new(),
        })
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Column names and data types for `table`, cached for the store's lifetime.
    fn table_columns(&mut self, table: &str) -> StoreResult<Vec<(String, String)>> {
        if let Some(columns) = self.columns.get(table) {
            return Ok(columns.clone());
        }

        let (schema, name) = split_table_name(table)?;
        let rows = self
            .runtime
            .block_on(self.client.query(
                "SELECT column_name::text, data_type::text
                 FROM information_schema.columns
                 WHERE table_schema = COALESCE($1::text, current_schema())
                   AND table_name = $2::text
                 ORDER BY ordinal_position",
                &[&schema, &name],
            ))
            .map_err(|e| StoreError::Query {
                table: table.to_string(),
                reason: describe(&e),
            })?;

        if rows.is_empty() {
            return Err(StoreError::Query {
                table: table.to_string(),
                reason: "table does not exist".to_string(),
            });
        }

        let columns: Vec<(String, String)> = rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect();
        self.columns.insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    /// Bind every field of `row` against the column types of `table`.
    fn bind_row(
        columns: &[(String, String)],
        table: &str,
        row: &Row,
    ) -> StoreResult<(Vec<String>, Vec<SqlParam>)> {
        let mut names = Vec::with_capacity(row.len());
        let mut params = Vec::with_capacity(row.len());
        for (name, value) in row.iter() {
            let data_type = column_type(columns, table, name)?;
            names.push(quote_column(name)?);
            params.push(value_to_sql(value, name, data_type)?);
        }
        Ok((names, params))
    }

    fn execute(&self, table: &str, sql: &str, params: &[SqlParam]) -> StoreResult<u64> {
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        self.runtime
            .block_on(self.client.execute(sql, &refs))
            .map_err(|e| StoreError::Write {
                table: table.to_string(),
                reason: describe(&e),
            })
    }

    fn row_exists(&mut self, table: &str, key_field: &str, key_value: &Value) -> StoreResult<bool> {
        let columns = self.table_columns(table)?;
        let key_type = column_type(&columns, table, key_field)?;
        let key_param = value_to_sql(key_value, key_field, key_type)?;
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = $1 LIMIT 1",
            quote_table(table)?,
            quote_column(key_field)?
        );
        let found = self
            .runtime
            .block_on(
                self.client
                    .query_opt(&sql, &[key_param.as_ref() as &(dyn ToSql + Sync)]),
            )
            .map_err(|e| StoreError::Write {
                table: table.to_string(),
                reason: describe(&e),
            })?;
        Ok(found.is_some())
    }

    fn update_rows(
        &mut self,
        table: &str,
        key_field: &str,
        key_value: &Value,
        fields: &Row,
    ) -> StoreResult<u64> {
        let columns = self.table_columns(table)?;
        let (names, mut params) = Self::bind_row(&columns, table, fields)?;
        let key_type = column_type(&columns, table, key_field)?;
        params.push(value_to_sql(key_value, key_field, key_type)?);

        let assignments: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(idx, name)| format!("{} = ${}", name, idx + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            quote_table(table)?,
            assignments.join(", "),
            quote_column(key_field)?,
            names.len() + 1
        );
        self.execute(table, &sql, &params)
    }
}

impl Store for PostgresStore {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn query(&mut self, table: &str) -> StoreResult<Vec<Row>> {
        let columns = self.table_columns(table)?;
        let select_list: Vec<String> = columns
            .iter()
            .map(|(name, data_type)| {
                let quoted = quote_ident(name);
                if NATIVE_TYPES.contains(&data_type.as_str()) {
                    quoted
                } else {
                    format!("{}::text AS {}", quoted, quoted)
                }
            })
            .collect();
        let sql = format!(
            "SELECT {} FROM {}",
            select_list.join(", "),
            quote_table(table)?
        );

        let query_error = |e: tokio_postgres::Error| StoreError::Query {
            table: table.to_string(),
            reason: describe(&e),
        };

        let pg_rows = self
            .runtime
            .block_on(self.client.query(&sql, &[]))
            .map_err(query_error)?;

        let rows = pg_rows
            .iter()
            .map(|pg_row| {
                let mut row = Row::with_capacity(pg_row.len());
                for (idx, column) in pg_row.columns().iter().enumerate() {
                    row.insert(column.name(), decode_column(pg_row, idx)?);
                }
                Ok(row)
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()
            .map_err(query_error)?;

        tracing::debug!("Read {} rows from PostgreSQL table '{}'", rows.len(), table);
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

        let columns = self.table_columns(table)?;
        let (names, params) = Self::bind_row(&columns, table, row)?;
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_table(table)?,
            names.join(", "),
            placeholders.join(", ")
        );
        self.execute(table, &sql, &params)?;
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
        self.columns.clear();
        self.runtime
            .block_on(self.client.batch_execute(statement))
            .map_err(|e| StoreError::Ddl {
                reason: describe(&e),
            })
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        let PostgresStore {
            runtime,
            client,
            locator,
            ..
        } = *self;
        drop(client);
        drop(runtime);
        tracing::debug!("Closed PostgreSQL connection to {}", locator);
        Ok(())
    }
}

/// Prefer the server's message over tokio-postgres' terse "db error".
fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{}: {}", db.severity(), db.message()),
        None => e.to_string(),
    }
}

fn column_type<'c>(
    columns: &'c [(String, String)],
    table: &str,
    column: &str,
) -> StoreResult<&'c str> {
    columns
        .iter()
        .find(|(name, _)| name == column)
        .map(|(_, data_type)| data_type.as_str())
        .ok_or_else(|| StoreError::Write {
            table: table.to_string(),
            reason: format!("column '{}' does not exist", column),
        })
}

/// Decode one column of a result row into a [`Value`].
fn decode_column(row: &tokio_postgres::Row, idx: usize) -> Result<Value, tokio_postgres::Error> {
    let value = match *row.columns()[idx].type_() {
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(|v| Value::Int(v.into())),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(|v| Value::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(|d| {
            d.to_f64()
                .map(Value::Float)
                .unwrap_or_else(|| Value::Text(d.to_string()))
        }),
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(Value::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| Value::Timestamp(v.naive_utc())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(Value::Date),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|v| Value::Text(v.to_string())),
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Apply `convert` to a non-null value.
///
/// Returns `Some(None)` for `Null`, `Some(Some(v))` on success and `None`
/// when the value cannot be represented.
fn nullable<T>(value: &Value, convert: impl Fn(&Value) -> Option<T>) -> Option<Option<T>> {
    match value {
        Value::Null => Some(None),
        other => convert(other).map(Some),
    }
}

fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Int(i) => Some(Decimal::from(*i)),
        Value::Float(f) => Decimal::try_from(*f).ok(),
        Value::Bool(b) => Some(Decimal::from(i64::from(*b))),
        Value::Text(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn to_json(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::Text(s) => {
            Some(serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone())))
        }
        Value::Int(i) => Some(serde_json::json!(i)),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
        Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        Value::Timestamp(_) | Value::Date(_) => {
            Some(serde_json::Value::String(value.to_string()))
        }
        Value::Null => None,
    }
}

/// Convert a value into a parameter of the target column's declared type.
///
/// tokio-postgres checks parameter types strictly (an `i64` is rejected for
/// an `integer` column), so every value is converted per column, nulls
/// included.
fn value_to_sql(value: &Value, column: &str, data_type: &str) -> StoreResult<SqlParam> {
    let conversion = || StoreError::Conversion {
        column: column.to_string(),
        data_type: data_type.to_string(),
        value: value.to_string(),
    };

    let param: SqlParam = match data_type {
        "smallint" => Box::new(
            nullable(value, |v| v.as_i64().and_then(|i| i16::try_from(i).ok()))
                .ok_or_else(conversion)?,
        ),
        "integer" => Box::new(
            nullable(value, |v| v.as_i64().and_then(|i| i32::try_from(i).ok()))
                .ok_or_else(conversion)?,
        ),
        "bigint" => Box::new(nullable(value, Value::as_i64).ok_or_else(conversion)?),
        "real" => Box::new(
            nullable(value, |v| v.as_f64().map(|f| f as f32)).ok_or_else(conversion)?,
        ),
        "double precision" => Box::new(nullable(value, Value::as_f64).ok_or_else(conversion)?),
        "numeric" => Box::new(nullable(value, to_decimal).ok_or_else(conversion)?),
        "boolean" => Box::new(nullable(value, Value::as_bool).ok_or_else(conversion)?),
        "timestamp without time zone" => {
            Box::new(nullable(value, Value::as_timestamp).ok_or_else(conversion)?)
        }
        "timestamp with time zone" => Box::new(
            nullable(value, |v| {
                v.as_timestamp().map(|ts| Utc.from_utc_datetime(&ts))
            })
            .ok_or_else(conversion)?,
        ),
        "date" => Box::new(
            nullable(value, Value::as_date).ok_or_else(conversion)?,
        ),
        "json" | "jsonb" => Box::new(nullable(value, to_json).ok_or_else(conversion)?),
        _ => Box::new(nullable(value, |v| Some(v.to_string())).ok_or_else(conversion)?),
    };
    Ok(param)
}
