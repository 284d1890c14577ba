// ABOUTME: Outcome of one reconciliation pass over a logical database
// ABOUTME: Per-direction write counts, conflicts, isolated failures, and overall status

use serde::Serialize;

/// Writes performed in one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectionStats {
    pub affected_rows: u64,
    /// Human-readable log of each successful write, e.g. `UPDATE 42: [status]`
    pub operations: Vec<String>,
}

impl DirectionStats {
    pub fn record(&mut self, operation: String) {
        self.affected_rows += 1;
        self.operations.push(operation);
    }
}

/// Result of reconciling one logical database.
///
/// Every failure mode is represented here; the orchestrator never returns an
/// error to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub database: String,
    pub primary_to_secondary: DirectionStats,
    pub secondary_to_primary: DirectionStats,
    /// Rows that need external resolution (no write was made for them)
    pub conflicts: Vec<String>,
    /// Row writes that failed without aborting the run
    pub failures: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SyncResult {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            primary_to_secondary: DirectionStats::default(),
            secondary_to_primary: DirectionStats::default(),
            conflicts: Vec::new(),
            failures: Vec::new(),
            success: true,
            error: None,
            duration_ms: 0,
        }
    }

    /// Mark the run failed. The first error is kept; later ones are appended.
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.success = false;
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{}; {}", existing, error),
            None => error,
        });
    }

    pub fn total_affected_rows(&self) -> u64 {
        self.primary_to_secondary.affected_rows + self.secondary_to_primary.affected_rows
    }

    /// Whether the run found nothing to do (the stores had converged).
    pub fn is_converged(&self) -> bool {
        self.success
            && self.total_affected_rows() == 0
            && self.conflicts.is_empty()
            && self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_result_is_successful_and_converged() {
        let result = SyncResult::new("crm");
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.is_converged());
    }

    #[test]
    fn test_record_counts_operations() {
        let mut result = SyncResult::new("crm");
        result.primary_to_secondary.record("INSERT 1".to_string());
        result
            .secondary_to_primary
            .record("UPDATE 2: [status]".to_string());
        assert_eq!(result.total_affected_rows(), 2);
        assert_eq!(result.primary_to_secondary.operations, vec!["INSERT 1"]);
        assert!(!result.is_converged());
    }

    #[test]
    fn test_fail_accumulates_errors() {
        let mut result = SyncResult::new("crm");
        result.fail("primary store unavailable");
        result.fail("failed to record sync metadata");
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("primary store unavailable; failed to record sync metadata")
        );
    }

    #[test]
    fn test_serializes_to_json() {
        let mut result = SyncResult::new("crm");
        result.conflicts.push("clientes: key 3".to_string());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["database"], "crm");
        assert_eq!(json["primary_to_secondary"]["affected_rows"], 0);
        assert_eq!(json["conflicts"][0], "clientes: key 3");
        assert_eq!(json["error"], serde_json::Value::Null);
    }
}
