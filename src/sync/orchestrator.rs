// ABOUTME: SyncOrchestrator - runs reconciliation passes for a batch of databases
// ABOUTME: Connect, extract, diff, apply per table, then record metadata; never errors out

use std::fmt;
use std::time::Instant;

use super::apply::ChangeApplier;
use super::diff::diff;
use super::extract::RowExtractor;
use super::metadata::{self, SyncDirection, SyncStatus};
use super::result::SyncResult;
use super::Side;
use crate::config::{DatabaseConfig, SyncRule, SyncRuleRegistry};
use crate::store::{ConnectMode, DefaultConnector, Store, StoreConnector};

/// Where a database run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Connecting,
    Extracting,
    Diffing,
    Applying,
    RecordingMetadata,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Idle => "idle",
            RunStage::Connecting => "connecting",
            RunStage::Extracting => "extracting",
            RunStage::Diffing => "diffing",
            RunStage::Applying => "applying",
            RunStage::RecordingMetadata => "recording metadata",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Stage tracker for one database run, traced at debug level.
struct RunProgress {
    stage: RunStage,
}

impl RunProgress {
    fn new() -> Self {
        Self {
            stage: RunStage::Idle,
        }
    }

    fn enter(&mut self, next: RunStage) {
        tracing::debug!("{} -> {}", self.stage, next);
        self.stage = next;
    }
}

/// Runs reconciliation passes over the databases of a registry.
///
/// Databases run one at a time and tables within a database run one at a
/// time. Every failure is reported in the returned [`SyncResult`]s.
pub struct SyncOrchestrator<'a, C: StoreConnector = DefaultConnector> {
    registry: &'a SyncRuleRegistry,
    connector: C,
}

impl<'a> SyncOrchestrator<'a, DefaultConnector> {
    pub fn new(registry: &'a SyncRuleRegistry) -> Self {
        Self::with_connector(registry, DefaultConnector)
    }
}

impl<'a, C: StoreConnector> SyncOrchestrator<'a, C> {
    /// Use `connector` instead of the built-in SQLite/PostgreSQL drivers.
    pub fn with_connector(registry: &'a SyncRuleRegistry, connector: C) -> Self {
        Self {
            registry,
            connector,
        }
    }

    pub fn registry(&self) -> &SyncRuleRegistry {
        self.registry
    }

    /// Reconcile every configured database.
    pub fn run_all(&self) -> Vec<SyncResult> {
        self.run_batch(self.registry.databases())
    }

    /// Reconcile one database by name. An unknown name yields a failed result.
    pub fn run_database(&self, name: &str) -> SyncResult {
        match self.registry.get(name) {
            Some(database) => self.sync_database(database),
            None => {
                tracing::error!("Database '{}' is not configured", name);
                let mut result = SyncResult::new(name);
                result.fail(format!("Database '{}' is not configured", name));
                result
            }
        }
    }

    /// Reconcile `databases` in order, one result per database.
    ///
    /// A failed database never stops the ones after it.
    pub fn run_batch(&self, databases: &[DatabaseConfig]) -> Vec<SyncResult> {
        databases
            .iter()
            .map(|database| self.sync_database(database))
            .collect()
    }

    fn sync_database(&self, database: &DatabaseConfig) -> SyncResult {
        let start = Instant::now();
        let span = tracing::info_span!("reconcile", database = %database.name);
        let _guard = span.enter();

        let mut result = SyncResult::new(&database.name);
        let mut progress = RunProgress::new();

        tracing::info!(
            "Starting reconciliation of '{}' ({} tables)",
            database.name,
            database.tables.len()
        );

        // Connect: the primary must exist, the secondary is created on demand
        progress.enter(RunStage::Connecting);
        let mut primary = match self.connector.connect(&database.primary, ConnectMode::MustExist) {
            Ok(store) => store,
            Err(e) => {
                result.fail(format!("Primary store unavailable: {}", e));
                return self.finish(result, progress, start);
            }
        };
        let mut secondary = match self
            .connector
            .connect(&database.secondary, ConnectMode::CreateIfMissing)
        {
            Ok(store) => store,
            Err(e) => {
                result.fail(format!("Secondary store unavailable: {}", e));
                close_store(primary, Side::Primary);
                return self.finish(result, progress, start);
            }
        };

        for rule in &database.tables {
            sync_table(
                rule,
                primary.as_mut(),
                secondary.as_mut(),
                &mut result,
                &mut progress,
            );
        }

        // Record the outcome in the secondary store
        progress.enter(RunStage::RecordingMetadata);
        let direction = if database.is_bidirectional() {
            SyncDirection::Bidirectional
        } else {
            SyncDirection::PrimaryToSecondary
        };
        let status = if result.failures.is_empty() {
            SyncStatus::Success
        } else {
            SyncStatus::Failure
        };
        if let Err(e) = metadata::record(secondary.as_mut(), &database.name, direction, status) {
            result.fail(format!("Failed to record sync metadata: {}", e));
        }

        close_store(primary, Side::Primary);
        close_store(secondary, Side::Secondary);

        self.finish(result, progress, start)
    }

    fn finish(&self, mut result: SyncResult, mut progress: RunProgress, start: Instant) -> SyncResult {
        result.duration_ms = start.elapsed().as_millis() as u64;

        if result.success {
            progress.enter(RunStage::Done);
            tracing::info!(
                "Reconciled '{}': {} rows primary->secondary, {} rows secondary->primary, {} conflicts, {} failed writes in {}ms",
                result.database,
                result.primary_to_secondary.affected_rows,
                result.secondary_to_primary.affected_rows,
                result.conflicts.len(),
                result.failures.len(),
                result.duration_ms
            );
            if !result.failures.is_empty() {
                tracing::warn!(
                    "Reconciliation of '{}' had {} failed writes",
                    result.database,
                    result.failures.len()
                );
            }
        } else {
            progress.enter(RunStage::Failed);
            tracing::error!(
                "Reconciliation of '{}' failed: {}",
                result.database,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        result
    }
}

/// One reconciliation pass over a single table.
fn sync_table(
    rule: &SyncRule,
    primary: &mut dyn Store,
    secondary: &mut dyn Store,
    result: &mut SyncResult,
    progress: &mut RunProgress,
) {
    progress.enter(RunStage::Extracting);
    let primary_rows = RowExtractor::new(primary, Side::Primary).extract(&rule.primary_table);
    let secondary_rows =
        RowExtractor::new(secondary, Side::Secondary).extract(&rule.secondary_table);

    progress.enter(RunStage::Diffing);
    let changes = diff(primary_rows, secondary_rows, rule);
    if changes.is_empty() {
        tracing::debug!("No changes for table '{}'", rule.primary_table);
        return;
    }
    let tally = changes.tally();
    tracing::info!(
        "Table '{}': {} inserts to secondary, {} inserts to primary, {} updates, {} conflicts",
        rule.primary_table,
        tally.inserts_to_secondary,
        tally.inserts_to_primary,
        tally.updates,
        tally.conflicts
    );

    progress.enter(RunStage::Applying);
    ChangeApplier::new(rule, primary, secondary).apply(changes, result);
}

fn close_store(store: Box<dyn Store>, side: Side) {
    if let Err(e) = store.close() {
        tracing::warn!("Failed to close {} store: {}", side, e);
    }
}
