//! Backup application logic: the per-VM hot-backup state machine, the
//! fleet orchestrator with skip rules and retention sweep, the restore
//! artifact generator, and the `BackupRun` context that accumulates
//! the structured run log.

pub mod machine;
pub mod orchestrator;
pub mod restore;
pub mod run;

pub use machine::backup_vm;
pub use orchestrator::{run_fleet_backup, OrchestratorConfig};
pub use run::{BackupResult, BackupRun, LogEntry, RunSummary, Severity, VmOutcome};
