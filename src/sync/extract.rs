// ABOUTME: Reads every row of a table from one store for diffing
// ABOUTME: Query failures degrade to an empty table for the current run

use super::Side;
use crate::row::Row;
use crate::store::Store;

/// Reads whole tables from one side of a reconciliation.
pub struct RowExtractor<'a> {
    store: &'a mut dyn Store,
    side: Side,
}

impl<'a> RowExtractor<'a> {
    pub fn new(store: &'a mut dyn Store, side: Side) -> Self {
        Self { store, side }
    }

    /// Read all rows of `table`, preserving source column names.
    ///
    /// A failed query is logged and returns no rows: the table appears empty
    /// for this run. This is only safe because deletes are never propagated;
    /// a missing row is always treated as "insert again", never "remove".
    pub fn extract(&mut self, table: &str) -> Vec<Row> {
        match self.store.query(table) {
            Ok(rows) => {
                tracing::debug!(
                    "Extracted {} rows from {} table '{}'",
                    rows.len(),
                    self.side,
                    table
                );
                rows
            }
            Err(e) => {
                tracing::error!(
                    "Failed to extract {} table '{}', treating it as empty for this run: {}",
                    self.side,
                    table,
                    e
                );
                Vec::new()
            }
        }
    }
}
