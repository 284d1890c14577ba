// ABOUTME: Failure isolation tests using a fault-injecting store wrapper
// ABOUTME: Failed row writes, failed extractions, and unreachable stores stay contained

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use database_reconciler::config::{DatabaseConfig, SyncRule, SyncRuleRegistry};
use database_reconciler::row::{Row, Value};
use database_reconciler::store::{
    ConnectMode, DefaultConnector, Dialect, SqliteStore, Store, StoreConnector, StoreError,
    StoreResult,
};
use database_reconciler::sync::SyncOrchestrator;
use tempfile::{tempdir, TempDir};

const SCHEMA: &str = "CREATE TABLE clientes (id INTEGER PRIMARY KEY, status TEXT, total REAL);";

/// Faults to inject into the stores opened by [`FaultyConnector`].
#[derive(Clone, Default)]
struct Faults {
    /// Writes touching these keys fail
    failing_keys: HashSet<String>,
    /// Queries of these tables fail
    failing_tables: HashSet<String>,
    /// Connecting to these locators fails
    unreachable: HashSet<String>,
    /// Every query against these locators fails
    unreadable: HashSet<String>,
}

struct FaultyStore {
    inner: Box<dyn Store>,
    key_field: String,
    unreadable: bool,
    faults: Faults,
}

impl FaultyStore {
    fn check_write(&self, table: &str, key: Option<&Value>) -> StoreResult<()> {
        match key {
            Some(value) if self.faults.failing_keys.contains(&value.to_string()) => {
                Err(StoreError::Write {
                    table: table.to_string(),
                    reason: format!("injected fault for key {}", value),
                })
            }
            _ => Ok(()),
        }
    }
}

impl Store for FaultyStore {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn query(&mut self, table: &str) -> StoreResult<Vec<Row>> {
        if self.unreadable || self.faults.failing_tables.contains(table) {
            return Err(StoreError::Query {
                table: table.to_string(),
                reason: "injected fault".to_string(),
            });
        }
        self.inner.query(table)
    }

    fn upsert(&mut self, table: &str, key_field: &str, row: &Row) -> StoreResult<()> {
        self.check_write(table, row.get(key_field))?;
        self.inner.upsert(table, key_field, row)
    }

    fn insert(&mut self, table: &str, row: &Row) -> StoreResult<()> {
        self.check_write(table, row.get(&self.key_field))?;
        self.inner.insert(table, row)
    }

    fn update(
        &mut self,
        table: &str,
        key_field: &str,
        key_value: &Value,
        fields: &Row,
    ) -> StoreResult<()> {
        self.check_write(table, Some(key_value))?;
        self.inner.update(table, key_field, key_value, fields)
    }

    fn execute_ddl(&mut self, statement: &str) -> StoreResult<()> {
        self.inner.execute_ddl(statement)
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        let FaultyStore { inner, .. } = *self;
        inner.close()
    }
}

struct FaultyConnector {
    faults: Faults,
}

impl StoreConnector for FaultyConnector {
    fn connect(&self, locator: &str, mode: ConnectMode) -> StoreResult<Box<dyn Store>> {
        if self.faults.unreachable.contains(locator) {
            return Err(StoreError::Connectivity {
                locator: locator.to_string(),
                reason: "injected fault".to_string(),
            });
        }
        let inner = DefaultConnector.connect(locator, mode)?;
        Ok(Box::new(FaultyStore {
            inner,
            key_field: "id".to_string(),
            unreadable: self.faults.unreadable.contains(locator),
            faults: self.faults.clone(),
        }))
    }
}

struct Fixture {
    _dir: TempDir,
    primary: PathBuf,
    secondary: PathBuf,
}

impl Fixture {
    fn new(primary_sql: &str, secondary_sql: &str) -> Self {
        let dir = tempdir().unwrap();
        let primary = dir.path().join("primary.db");
        let secondary = dir.path().join("secondary.db");
        exec(&primary, &format!("{}{}", SCHEMA, primary_sql));
        exec(&secondary, &format!("{}{}", SCHEMA, secondary_sql));
        Self {
            _dir: dir,
            primary,
            secondary,
        }
    }

    fn registry(&self) -> SyncRuleRegistry {
        let database = DatabaseConfig::new(
            "crm",
            self.primary.to_str().unwrap(),
            self.secondary.to_str().unwrap(),
        )
        .with_table(SyncRule::new("clientes", "id").with_delegated_fields(["status"]));
        SyncRuleRegistry::new(vec![database]).unwrap()
    }
}

fn exec(path: &Path, sql: &str) {
    let mut store = SqliteStore::open(path, ConnectMode::CreateIfMissing).unwrap();
    store.execute_ddl(sql).unwrap();
}

fn keys(path: &Path) -> Vec<i64> {
    let mut store = SqliteStore::open(path, ConnectMode::MustExist).unwrap();
    let mut keys: Vec<i64> = store
        .query("clientes")
        .unwrap()
        .iter()
        .filter_map(|row| row.get("id").and_then(Value::as_i64))
        .collect();
    keys.sort_unstable();
    keys
}

fn status_of(path: &Path, id: i64) -> Option<Value> {
    let mut store = SqliteStore::open(path, ConnectMode::MustExist).unwrap();
    store
        .query("clientes")
        .unwrap()
        .into_iter()
        .find(|row| row.get("id").and_then(Value::as_i64) == Some(id))
        .and_then(|row| row.get("status").cloned())
}

fn unreadable(path: &Path) -> Faults {
    Faults {
        unreadable: [path.to_str().unwrap().to_string()].into_iter().collect(),
        ..Faults::default()
    }
}

fn failing_key(key: &str) -> Faults {
    Faults {
        failing_keys: [key.to_string()].into_iter().collect(),
        ..Faults::default()
    }
}

#[test]
fn test_failed_insert_does_not_stop_remaining_keys() {
    let fixture = Fixture::new(
        "INSERT INTO clientes VALUES (4, 'NEW', 4), (5, 'NEW', 5), (6, 'NEW', 6);",
        "",
    );
    let registry = fixture.registry();
    let connector = FaultyConnector {
        faults: failing_key("4"),
    };

    let result = SyncOrchestrator::with_connector(&registry, connector).run_database("crm");

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].contains("INSERT 4"));
    assert_eq!(result.primary_to_secondary.affected_rows, 2);
    assert_eq!(
        result.primary_to_secondary.operations,
        vec!["INSERT 5", "INSERT 6"]
    );
    assert_eq!(keys(&fixture.secondary), vec![5, 6]);
}

#[test]
fn test_failed_update_does_not_stop_remaining_keys() {
    let fixture = Fixture::new(
        "INSERT INTO clientes VALUES (4, 'NEW', 40), (5, 'NEW', 50), (6, 'NEW', 60);",
        "INSERT INTO clientes VALUES (4, 'SENT', 4), (5, 'SENT', 5), (6, 'SENT', 6);",
    );
    let registry = fixture.registry();
    let connector = FaultyConnector {
        faults: failing_key("4"),
    };

    let result = SyncOrchestrator::with_connector(&registry, connector).run_database("crm");

    // Key 4 fails in both directions; keys 5 and 6 apply in both.
    assert_eq!(result.failures.len(), 2);
    assert_eq!(
        result.primary_to_secondary.operations,
        vec!["UPDATE 5: [total]", "UPDATE 6: [total]"]
    );
    assert_eq!(
        result.secondary_to_primary.operations,
        vec!["UPDATE 5: [status]", "UPDATE 6: [status]"]
    );

    // The failed key converges once the fault clears.
    let retry = SyncOrchestrator::new(&registry).run_database("crm");
    assert_eq!(retry.total_affected_rows(), 2);
    assert!(retry.failures.is_empty());
    let converged = SyncOrchestrator::new(&registry).run_database("crm");
    assert!(converged.is_converged());
}

#[test]
fn test_failed_extraction_reads_as_empty_table_and_deletes_nothing() {
    let fixture = Fixture::new(
        "INSERT INTO clientes VALUES (1, 'NEW', 1);",
        "INSERT INTO clientes VALUES (1, 'NEW', 1), (2, 'NEW', 2);",
    );
    let registry = fixture.registry();
    let mut faults = Faults::default();
    faults.failing_tables.insert("clientes".to_string());
    let connector = FaultyConnector { faults };

    let result = SyncOrchestrator::with_connector(&registry, connector).run_database("crm");

    // Both sides read as empty: nothing to diff, nothing written, nothing removed.
    assert!(result.success);
    assert!(result.is_converged());
    assert_eq!(keys(&fixture.primary), vec![1]);
    assert_eq!(keys(&fixture.secondary), vec![1, 2]);
}

#[test]
fn test_failed_primary_extraction_turns_secondary_rows_into_conflicts() {
    let fixture = Fixture::new(
        "INSERT INTO clientes VALUES (1, 'NEW', 1);",
        "INSERT INTO clientes VALUES (1, 'SENT', 1), (2, 'NEW', 2);",
    );
    let registry = fixture.registry();
    let connector = FaultyConnector {
        faults: unreadable(&fixture.primary),
    };

    let result = SyncOrchestrator::with_connector(&registry, connector).run_database("crm");

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.conflicts.len(), 2);
    assert!(result.conflicts[0].contains("key 1"));
    assert!(result.conflicts[1].contains("key 2"));
    assert_eq!(result.total_affected_rows(), 0);
    assert!(result.failures.is_empty());
    assert_eq!(keys(&fixture.primary), vec![1]);
    assert_eq!(keys(&fixture.secondary), vec![1, 2]);
    assert_eq!(status_of(&fixture.secondary, 1), Some(Value::from("SENT")));
}

#[test]
fn test_failed_secondary_extraction_upserts_every_primary_row() {
    let fixture = Fixture::new(
        "INSERT INTO clientes VALUES (1, 'NEW', 10);",
        "INSERT INTO clientes VALUES (1, 'SENT', 1), (2, 'NEW', 2);",
    );
    let registry = fixture.registry();
    let connector = FaultyConnector {
        faults: unreadable(&fixture.secondary),
    };

    let result = SyncOrchestrator::with_connector(&registry, connector).run_database("crm");

    // The secondary reads as empty, so row 1 is re-inserted as a whole and
    // its delegated status is overwritten with the primary's value.
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.primary_to_secondary.operations, vec!["INSERT 1"]);
    assert_eq!(result.secondary_to_primary.affected_rows, 0);
    assert!(result.conflicts.is_empty());
    assert_eq!(status_of(&fixture.secondary, 1), Some(Value::from("NEW")));
    assert_eq!(keys(&fixture.secondary), vec![1, 2]);
    assert_eq!(keys(&fixture.primary), vec![1]);
}

#[test]
fn test_unreachable_secondary_fails_only_its_database() {
    let fixture = Fixture::new("INSERT INTO clientes VALUES (1, 'NEW', 1);", "");
    let other = Fixture::new("INSERT INTO clientes VALUES (7, 'NEW', 7);", "");

    let broken = DatabaseConfig::new(
        "broken",
        fixture.primary.to_str().unwrap(),
        fixture.secondary.to_str().unwrap(),
    )
    .with_table(SyncRule::new("clientes", "id"));
    let healthy = DatabaseConfig::new(
        "healthy",
        other.primary.to_str().unwrap(),
        other.secondary.to_str().unwrap(),
    )
    .with_table(SyncRule::new("clientes", "id"));
    let registry = SyncRuleRegistry::new(vec![broken, healthy]).unwrap();

    let mut faults = Faults::default();
    faults
        .unreachable
        .insert(fixture.secondary.to_str().unwrap().to_string());
    let connector = FaultyConnector { faults };

    let results = SyncOrchestrator::with_connector(&registry, connector).run_all();

    assert!(!results[0].success);
    assert!(results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("Secondary store unavailable"));
    assert_eq!(results[0].total_affected_rows(), 0);
    assert!(keys(&fixture.secondary).is_empty());

    assert!(results[1].success);
    assert_eq!(results[1].primary_to_secondary.operations, vec!["INSERT 7"]);
}
