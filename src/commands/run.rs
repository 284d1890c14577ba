// ABOUTME: Run command - one reconciliation pass over the configured databases
// ABOUTME: Prints a per-database summary or the SyncResult list as JSON

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::{DatabaseConfig, SyncRuleRegistry};
use crate::sync::{SyncOrchestrator, SyncResult};

/// Load the registry and resolve the databases a command should cover.
pub(crate) fn load_batch(
    config_path: &Path,
    databases: Option<&[String]>,
) -> Result<(SyncRuleRegistry, Vec<DatabaseConfig>)> {
    let registry = SyncRuleRegistry::load(config_path)?;
    let batch = match databases {
        Some(names) if !names.is_empty() => registry.select(names)?,
        _ => registry.databases().to_vec(),
    };
    Ok((registry, batch))
}

/// Run one pass and print the outcome.
///
/// Returns `Ok(false)` when any database failed, so the caller can set a
/// non-zero exit status. Configuration problems are errors.
pub fn run(config_path: &Path, databases: Option<Vec<String>>, json: bool) -> Result<bool> {
    let (registry, batch) = load_batch(config_path, databases.as_deref())?;

    tracing::info!(
        "Reconciling {} database(s) from {}",
        batch.len(),
        config_path.display()
    );

    let results = SyncOrchestrator::new(&registry).run_batch(&batch);

    if json {
        let output =
            serde_json::to_string_pretty(&results).context("Failed to serialize sync results")?;
        println!("{}", output);
    } else {
        print_summary(&results);
    }

    Ok(results.iter().all(|result| result.success))
}

pub(crate) fn print_summary(results: &[SyncResult]) {
    for result in results {
        if result.success {
            println!(
                "✓ {}: {} primary->secondary, {} secondary->primary, {} conflicts, {} failed writes ({}ms)",
                result.database,
                result.primary_to_secondary.affected_rows,
                result.secondary_to_primary.affected_rows,
                result.conflicts.len(),
                result.failures.len(),
                result.duration_ms
            );
        } else {
            println!(
                "✗ {}: {}",
                result.database,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        for operation in &result.primary_to_secondary.operations {
            println!("    primary->secondary {}", operation);
        }
        for operation in &result.secondary_to_primary.operations {
            println!("    secondary->primary {}", operation);
        }
        for conflict in &result.conflicts {
            println!("    conflict: {}", conflict);
        }
        for failure in &result.failures {
            println!("    failed: {}", failure);
        }
    }
}
