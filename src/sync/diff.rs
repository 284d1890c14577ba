// ABOUTME: Key-by-key comparison of a table's rows across the two stores
// ABOUTME: Produces inserts, per-field differences, and ambiguous conflicts

use std::collections::HashMap;

use super::Side;
use crate::config::{MasterSource, SyncRule};
use crate::row::{Row, RowKey, Value};

/// A field whose normalized value differs between the stores.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub field: String,
    pub primary: Value,
    pub secondary: Value,
}

/// What must happen to the row with one key.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEntry {
    /// Row exists only in the primary store
    InsertPrimaryToSecondary(Row),
    /// Row exists only in the secondary store and the secondary is master
    InsertSecondaryToPrimary(Row),
    /// Row exists in both with differing fields, in primary column order
    FieldDiffs {
        primary_key: Value,
        secondary_key: Value,
        fields: Vec<FieldDiff>,
    },
    /// Row exists only in the secondary store while the primary is master
    ConflictAmbiguous,
}

/// Per-key changes for one table.
///
/// Keys are unique. Entries come in primary row order, followed by
/// secondary-only keys in secondary row order. Unchanged keys have no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    entries: Vec<(RowKey, ChangeEntry)>,
}

/// Entry counts by kind, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTally {
    pub inserts_to_secondary: usize,
    pub inserts_to_primary: usize,
    pub updates: usize,
    pub conflicts: usize,
}

impl ChangeSet {
    fn push(&mut self, key: RowKey, entry: ChangeEntry) {
        self.entries.push((key, entry));
    }

    pub fn get(&self, key: &str) -> Option<&ChangeEntry> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &ChangeEntry)> {
        self.entries.iter().map(|(key, entry)| (key, entry))
    }

    pub fn tally(&self) -> ChangeTally {
        let mut tally = ChangeTally::default();
        for (_, entry) in &self.entries {
            match entry {
                ChangeEntry::InsertPrimaryToSecondary(_) => tally.inserts_to_secondary += 1,
                ChangeEntry::InsertSecondaryToPrimary(_) => tally.inserts_to_primary += 1,
                ChangeEntry::FieldDiffs { .. } => tally.updates += 1,
                ChangeEntry::ConflictAmbiguous => tally.conflicts += 1,
            }
        }
        tally
    }
}

impl IntoIterator for ChangeSet {
    type Item = (RowKey, ChangeEntry);
    type IntoIter = std::vec::IntoIter<(RowKey, ChangeEntry)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Rows indexed by key, keeping first-seen order.
///
/// When a key repeats, the later row replaces the earlier one in place
/// (last wins). Whether duplicates are expected upstream is unknown, so they
/// are logged rather than rejected.
struct KeyedRows {
    rows: Vec<(RowKey, Row)>,
    positions: HashMap<RowKey, usize>,
}

impl KeyedRows {
    fn build(rows: Vec<Row>, key_field: &str, table: &str, side: Side) -> Self {
        let mut keyed = KeyedRows {
            rows: Vec::with_capacity(rows.len()),
            positions: HashMap::with_capacity(rows.len()),
        };

        for row in rows {
            let Some(key) = row.key(key_field) else {
                tracing::warn!(
                    "Skipping {} row in '{}' with missing or NULL key field '{}'",
                    side,
                    table,
                    key_field
                );
                continue;
            };

            match keyed.positions.get(&key) {
                Some(&pos) => {
                    tracing::debug!(
                        "Duplicate key {} in {} table '{}', keeping the last row",
                        key,
                        side,
                        table
                    );
                    keyed.rows[pos].1 = row;
                }
                None => {
                    keyed.positions.insert(key.clone(), keyed.rows.len());
                    keyed.rows.push((key, row));
                }
            }
        }

        keyed
    }

    fn get(&self, key: &RowKey) -> Option<&Row> {
        self.positions.get(key).map(|&pos| &self.rows[pos].1)
    }
}

/// Fields present in both rows whose normalized values differ.
///
/// The key field is never diffed; fields present on only one side are
/// ignored.
pub fn field_diffs(primary: &Row, secondary: &Row, key_field: &str) -> Vec<FieldDiff> {
    primary
        .iter()
        .filter(|(field, _)| *field != key_field)
        .filter_map(|(field, primary_value)| {
            let secondary_value = secondary.get(field)?;
            if primary_value.normalized() == secondary_value.normalized() {
                None
            } else {
                Some(FieldDiff {
                    field: field.to_string(),
                    primary: primary_value.clone(),
                    secondary: secondary_value.clone(),
                })
            }
        })
        .collect()
}

/// Compute the changes needed to reconcile one table.
pub fn diff(primary_rows: Vec<Row>, secondary_rows: Vec<Row>, rule: &SyncRule) -> ChangeSet {
    let key_field = rule.primary_key_field.as_str();
    let primary = KeyedRows::build(primary_rows, key_field, &rule.primary_table, Side::Primary);
    let secondary = KeyedRows::build(
        secondary_rows,
        key_field,
        &rule.secondary_table,
        Side::Secondary,
    );

    let mut changes = ChangeSet::default();

    let primary_keys = primary.positions;
    for (key, primary_row) in primary.rows {
        match secondary.get(&key) {
            None => changes.push(key, ChangeEntry::InsertPrimaryToSecondary(primary_row)),
            Some(secondary_row) => {
                let fields = field_diffs(&primary_row, secondary_row, key_field);
                if fields.is_empty() {
                    continue;
                }
                let primary_key = primary_row.get(key_field).cloned().unwrap_or(Value::Null);
                let secondary_key = secondary_row
                    .get(key_field)
                    .cloned()
                    .unwrap_or(Value::Null);
                changes.push(
                    key,
                    ChangeEntry::FieldDiffs {
                        primary_key,
                        secondary_key,
                        fields,
                    },
                );
            }
        }
    }

    for (key, secondary_row) in secondary.rows {
        if primary_keys.contains_key(&key) {
            continue;
        }
        let entry = match rule.master_source {
            MasterSource::Primary => ChangeEntry::ConflictAmbiguous,
            MasterSource::Secondary => ChangeEntry::InsertSecondaryToPrimary(secondary_row),
        };
        changes.push(key, entry);
    }

    changes
}
