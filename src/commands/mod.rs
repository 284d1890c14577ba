// ABOUTME: Command implementations for the reconciler CLI
// ABOUTME: Exports run, watch, and status commands

pub mod run;
pub mod status;
pub mod watch;

pub use run::run;
pub use status::status;
pub use watch::watch;
