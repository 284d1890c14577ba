// ABOUTME: Writes a table's ChangeSet to the two stores per field ownership
// ABOUTME: Row write failures are logged and isolated; remaining keys still apply

use super::diff::{ChangeEntry, ChangeSet, FieldDiff};
use super::result::SyncResult;
use crate::config::SyncRule;
use crate::row::{Row, RowKey, Value};
use crate::store::{Store, StoreError};

/// Applies one table's changes to the primary and secondary stores.
pub struct ChangeApplier<'a> {
    rule: &'a SyncRule,
    primary: &'a mut dyn Store,
    secondary: &'a mut dyn Store,
}

impl<'a> ChangeApplier<'a> {
    pub fn new(rule: &'a SyncRule, primary: &'a mut dyn Store, secondary: &'a mut dyn Store) -> Self {
        Self {
            rule,
            primary,
            secondary,
        }
    }

    /// Apply every entry, accumulating counts, conflicts and failures into `result`.
    ///
    /// Each write commits independently. A failed write does not stop the
    /// remaining keys and nothing already written is rolled back.
    pub fn apply(&mut self, changes: ChangeSet, result: &mut SyncResult) {
        for (key, entry) in changes {
            match entry {
                ChangeEntry::InsertPrimaryToSecondary(row) => {
                    self.insert_into_secondary(&key, &row, result);
                }
                ChangeEntry::InsertSecondaryToPrimary(row) => {
                    self.insert_into_primary(&key, &row, result);
                }
                ChangeEntry::FieldDiffs {
                    primary_key,
                    secondary_key,
                    fields,
                } => {
                    self.apply_field_diffs(&key, &primary_key, &secondary_key, fields, result);
                }
                ChangeEntry::ConflictAmbiguous => {
                    let conflict = format!(
                        "{}: key {} exists only in the secondary store while the primary store is master",
                        self.rule.secondary_table, key
                    );
                    tracing::warn!("Conflict: {}", conflict);
                    result.conflicts.push(conflict);
                }
            }
        }
    }

    fn insert_into_secondary(&mut self, key: &RowKey, row: &Row, result: &mut SyncResult) {
        let table = &self.rule.secondary_table;
        let operation = format!("INSERT {}", key);
        match self.secondary.upsert(table, &self.rule.primary_key_field, row) {
            Ok(()) => {
                tracing::debug!("{} -> secondary '{}'", operation, table);
                result.primary_to_secondary.record(operation);
            }
            Err(e) => record_failure(result, table, &operation, e),
        }
    }

    fn insert_into_primary(&mut self, key: &RowKey, row: &Row, result: &mut SyncResult) {
        let table = &self.rule.primary_table;
        let operation = format!("INSERT {}", key);
        match self.primary.insert(table, row) {
            Ok(()) => {
                tracing::debug!("{} -> primary '{}'", operation, table);
                result.secondary_to_primary.record(operation);
            }
            Err(e) => record_failure(result, table, &operation, e),
        }
    }

    /// Split the differing fields by owner and write each group to the
    /// store that does not own it. Both directions may fire for one key.
    fn apply_field_diffs(
        &mut self,
        key: &RowKey,
        primary_key: &Value,
        secondary_key: &Value,
        fields: Vec<FieldDiff>,
        result: &mut SyncResult,
    ) {
        let (delegated, owned): (Vec<FieldDiff>, Vec<FieldDiff>) = fields
            .into_iter()
            .partition(|diff| self.rule.is_delegated(&diff.field));

        if !delegated.is_empty() {
            let names = field_names(&delegated);
            let values: Row = delegated
                .into_iter()
                .map(|diff| (diff.field, diff.secondary))
                .collect();
            let table = &self.rule.primary_table;
            let operation = format!("UPDATE {}: [{}]", key, names);
            match self
                .primary
                .update(table, &self.rule.primary_key_field, primary_key, &values)
            {
                Ok(()) => {
                    tracing::debug!("{} -> primary '{}'", operation, table);
                    result.secondary_to_primary.record(operation);
                }
                Err(e) => record_failure(result, table, &operation, e),
            }
        }

        if !owned.is_empty() {
            let names = field_names(&owned);
            let values: Row = owned
                .into_iter()
                .map(|diff| (diff.field, diff.primary))
                .collect();
            let table = &self.rule.secondary_table;
            let operation = format!("UPDATE {}: [{}]", key, names);
            match self
                .secondary
                .update(table, &self.rule.primary_key_field, secondary_key, &values)
            {
                Ok(()) => {
                    tracing::debug!("{} -> secondary '{}'", operation, table);
                    result.primary_to_secondary.record(operation);
                }
                Err(e) => record_failure(result, table, &operation, e),
            }
        }
    }
}

fn field_names(diffs: &[FieldDiff]) -> String {
    diffs
        .iter()
        .map(|diff| diff.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn record_failure(
    result: &mut SyncResult,
    table: &str,
    operation: &str,
    error: StoreError,
) {
    let failure = format!("{}: {} failed: {}", table, operation, error);
    tracing::error!("{}", failure);
    result.failures.push(failure);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MasterSource;
    use crate::store::{ConnectMode, SqliteStore};
    use crate::sync::diff::diff;
    use crate::sync::extract::RowExtractor;
    use crate::sync::Side;

    const SCHEMA: &str = "CREATE TABLE clientes (id INTEGER PRIMARY KEY, status TEXT, total REAL);";

    fn stores(dir: &tempfile::TempDir) -> (SqliteStore, SqliteStore) {
        let mut primary =
            SqliteStore::open(&dir.path().join("p.db"), ConnectMode::CreateIfMissing).unwrap();
        let mut secondary =
            SqliteStore::open(&dir.path().join("s.db"), ConnectMode::CreateIfMissing).unwrap();
        primary.execute_ddl(SCHEMA).unwrap();
        secondary.execute_ddl(SCHEMA).unwrap();
        (primary, secondary)
    }

    fn reconcile(
        rule: &SyncRule,
        primary: &mut SqliteStore,
        secondary: &mut SqliteStore,
    ) -> SyncResult {
        let p = RowExtractor::new(primary, Side::Primary).extract("clientes");
        let s = RowExtractor::new(secondary, Side::Secondary).extract("clientes");
        let mut result = SyncResult::new("crm");
        ChangeApplier::new(rule, primary, secondary).apply(diff(p, s, rule), &mut result);
        result
    }

    #[test]
    fn test_field_ownership_split() {
        let dir = tempfile::tempdir().unwrap();
        let (mut primary, mut secondary) = stores(&dir);
        primary
            .execute_ddl("INSERT INTO clientes VALUES (2, 'NEW', 5)")
            .unwrap();
        secondary
            .execute_ddl("INSERT INTO clientes VALUES (2, 'SENT', 7)")
            .unwrap();

        let rule = SyncRule::new("clientes", "id").with_delegated_fields(["status"]);
        let result = reconcile(&rule, &mut primary, &mut secondary);

        assert_eq!(result.secondary_to_primary.operations, vec!["UPDATE 2: [status]"]);
        assert_eq!(result.primary_to_secondary.operations, vec!["UPDATE 2: [total]"]);

        let p = primary.query("clientes").unwrap();
        let s = secondary.query("clientes").unwrap();
        assert_eq!(p[0].get("status"), Some(&Value::from("SENT")));
        assert_eq!(s[0].get("total"), Some(&Value::Float(5.0)));
    }

    #[test]
    fn test_conflict_is_recorded_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut primary, mut secondary) = stores(&dir);
        secondary
            .execute_ddl("INSERT INTO clientes VALUES (3, 'SENT', 1)")
            .unwrap();

        let rule = SyncRule::new("clientes", "id");
        let result = reconcile(&rule, &mut primary, &mut secondary);

        assert_eq!(result.conflicts.len(), 1);
        assert!(result.conflicts[0].contains("key 3"));
        assert_eq!(result.total_affected_rows(), 0);
        assert!(primary.query("clientes").unwrap().is_empty());
    }

    #[test]
    fn test_secondary_master_inserts_into_primary() {
        let dir = tempfile::tempdir().unwrap();
        let (mut primary, mut secondary) = stores(&dir);
        secondary
            .execute_ddl("INSERT INTO clientes VALUES (8, 'SENT', 1)")
            .unwrap();

        let rule = SyncRule::new("clientes", "id").with_master_source(MasterSource::Secondary);
        let result = reconcile(&rule, &mut primary, &mut secondary);

        assert_eq!(result.secondary_to_primary.operations, vec!["INSERT 8"]);
        assert_eq!(primary.query("clientes").unwrap().len(), 1);
    }

    #[test]
    fn test_write_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let (mut primary, _) = stores(&dir);
        primary
            .execute_ddl("INSERT INTO clientes VALUES (1, 'NEW', 1), (2, 'NEW', 2)")
            .unwrap();
        // Secondary table missing, so every write fails.
        let mut secondary =
            SqliteStore::open(&dir.path().join("empty.db"), ConnectMode::CreateIfMissing).unwrap();

        let rule = SyncRule::new("clientes", "id");
        let result = reconcile(&rule, &mut primary, &mut secondary);

        assert_eq!(result.failures.len(), 2);
        assert!(result.failures[0].contains("INSERT 1"));
        assert!(result.failures[1].contains("INSERT 2"));
        assert!(result.success);
        assert_eq!(result.total_affected_rows(), 0);
    }
}
