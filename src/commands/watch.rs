// ABOUTME: Watch command - runs reconciliation passes at a fixed interval
// ABOUTME: Each pass is independent; failed passes are logged and the loop continues

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};

use super::run::{load_batch, print_summary};
use crate::sync::SyncOrchestrator;

/// Run passes every `interval`, forever or for `cycles` passes.
///
/// A limit of zero cycles is rejected.
pub fn watch(
    config_path: &Path,
    databases: Option<Vec<String>>,
    interval: Duration,
    cycles: Option<u64>,
) -> Result<()> {
    if interval.is_zero() {
        bail!("Interval must be at least one second");
    }
    if cycles == Some(0) {
        bail!("Cycles must be at least one");
    }

    let (registry, batch) = load_batch(config_path, databases.as_deref())?;
    let orchestrator = SyncOrchestrator::new(&registry);

    tracing::info!(
        "Watching {} database(s), reconciling every {}s",
        batch.len(),
        interval.as_secs()
    );

    let mut cycle = 0u64;
    loop {
        cycle += 1;
        tracing::info!("Starting reconciliation cycle {}", cycle);

        let results = orchestrator.run_batch(&batch);
        print_summary(&results);

        let failed = results.iter().filter(|result| !result.success).count();
        if failed > 0 {
            tracing::warn!("Cycle {} had {} failed database(s)", cycle, failed);
        }

        if cycles.is_some_and(|limit| cycle >= limit) {
            tracing::info!("Completed {} reconciliation cycle(s), stopping", cycle);
            return Ok(());
        }

        std::thread::sleep(interval);
    }
}
