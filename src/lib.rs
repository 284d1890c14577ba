// ABOUTME: Library root for database-reconciler
// ABOUTME: Bidirectional primary/secondary row store reconciliation engine

pub mod commands;
pub mod config;
pub mod row;
pub mod store;
pub mod sync;
pub mod utils;

pub use config::{DatabaseConfig, MasterSource, SyncRule, SyncRuleRegistry};
pub use row::{Row, RowKey, Value};
pub use store::{ConnectMode, DefaultConnector, Store, StoreConnector, StoreError};
pub use sync::{SyncOrchestrator, SyncResult};
