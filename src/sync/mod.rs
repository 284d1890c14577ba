// ABOUTME: Reconciliation engine - extract, diff, apply, and record metadata
// ABOUTME: Orchestrates bidirectional sync between a primary and a secondary store

pub mod apply;
pub mod diff;
pub mod extract;
pub mod metadata;
pub mod orchestrator;
pub mod result;

use std::fmt;

pub use apply::ChangeApplier;
pub use diff::{diff, ChangeEntry, ChangeSet, FieldDiff};
pub use extract::RowExtractor;
pub use metadata::{SyncDirection, SyncMetadataRecord, SyncStatus};
pub use orchestrator::{RunStage, SyncOrchestrator};
pub use result::{DirectionStats, SyncResult};

/// One of the two stores in a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Primary,
    Secondary,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Primary => write!(f, "primary"),
            Side::Secondary => write!(f, "secondary"),
        }
    }
}
