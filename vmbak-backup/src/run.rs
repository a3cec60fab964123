//! The `BackupRun` context object.
//!
//! One run owns one timestamped destination directory and accumulates
//! structured log entries and per-VM results. Components receive the
//! run context explicitly; there is no shared global log sink.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{error, info, warn};
use vmbak_core::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub vm: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VmOutcome {
    Ok,
    Degraded,
    Failed,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    pub vm: String,
    pub outcome: VmOutcome,
}

/// Final report data for one run; everything a notifier needs.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total: u32,
    pub skipped: u32,
    pub succeeded: u32,
    pub elapsed_secs: i64,
    pub results: Vec<BackupResult>,
}

impl RunSummary {
    /// Textual form delivered by notifiers (console, mail).
    pub fn render_text(&self) -> String {
        let mut text = format!(
            "vmbak run {}: {}/{} succeeded, {} skipped, elapsed {}s\n",
            self.run_id,
            self.succeeded,
            self.total,
            self.skipped,
            self.elapsed_secs
        );
        for result in &self.results {
            let outcome = match result.outcome {
                VmOutcome::Ok => "ok",
                VmOutcome::Degraded => "degraded",
                VmOutcome::Failed => "failed",
                VmOutcome::Critical => "CRITICAL",
            };
            text.push_str(&format!("  {:<10} {}\n", outcome, result.vm));
        }
        text
    }
}

/// Context for one orchestrator invocation.
pub struct BackupRun {
    pub id: String,
    dir: PathBuf,
    started: DateTime<Local>,
    entries: Vec<LogEntry>,
    results: Vec<BackupResult>,
    pub total: u32,
    pub skipped: u32,
    pub succeeded: u32,
}

impl BackupRun {
    /// Create the run directory `root/<id>/` with a timestamp-derived id.
    pub fn create(root: &Path) -> Result<Self> {
        let started = Local::now();
        let id = started.format("%Y%m%d-%H%M%S").to_string();
        let dir = root.join(&id);
        fs::create_dir_all(&dir)?;

        Ok(Self {
            id,
            dir,
            started,
            entries: Vec::new(),
            results: Vec::new(),
            total: 0,
            skipped: 0,
            succeeded: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Destination directory for one VM's backup set.
    pub fn vm_dir(&self, vm_name: &str) -> PathBuf {
        self.dir.join(vm_name)
    }

    /// Append a structured entry and mirror it to the tracing stream.
    pub fn log(&mut self, severity: Severity, vm: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        let vm_field = vm.unwrap_or("-");
        match severity {
            Severity::Info => info!(vm = vm_field, "{message}"),
            Severity::Warning => warn!(vm = vm_field, "{message}"),
            Severity::Error => error!(vm = vm_field, "{message}"),
            Severity::Critical => error!(vm = vm_field, "CRITICAL: {message}"),
        }
        self.entries.push(LogEntry {
            timestamp: Local::now(),
            severity,
            vm: vm.map(str::to_string),
            message,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Record a finished VM; only an `Ok` outcome counts as succeeded.
    pub fn record(&mut self, vm: &str, outcome: VmOutcome) {
        if outcome == VmOutcome::Ok {
            self.succeeded += 1;
        }
        self.results.push(BackupResult {
            vm: vm.to_string(),
            outcome,
        });
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.id.clone(),
            total: self.total,
            skipped: self.skipped,
            succeeded: self.succeeded,
            elapsed_secs: (Local::now() - self.started).num_seconds(),
            results: self.results.clone(),
        }
    }

    /// Write `log.txt` and `summary.json` into the run directory and
    /// return the summary for delivery.
    pub fn finalize(&self) -> Result<RunSummary> {
        let summary = self.summary();

        let mut log_text = String::new();
        for entry in &self.entries {
            let vm = entry.vm.as_deref().unwrap_or("-");
            log_text.push_str(&format!(
                "{} [{}] {}: {}\n",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.severity,
                vm,
                entry.message
            ));
        }
        log_text.push('\n');
        log_text.push_str(&summary.render_text());
        fs::write(self.dir.join("log.txt"), log_text)?;

        let json = serde_json::to_string_pretty(&summary)
            .map_err(|err| vmbak_core::error::BackupError::Other(err.into()))?;
        fs::write(self.dir.join("summary.json"), json)?;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn severity_tags_are_scannable() {
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
        assert_eq!(Severity::Warning.to_string(), "WARNING");
    }

    #[test]
    fn only_ok_counts_as_succeeded() {
        let root = TempDir::new().unwrap();
        let mut run = BackupRun::create(root.path()).unwrap();
        run.record("a", VmOutcome::Ok);
        run.record("b", VmOutcome::Degraded);
        run.record("c", VmOutcome::Critical);
        assert_eq!(run.succeeded, 1);
        assert_eq!(run.summary().results.len(), 3);
    }

    #[test]
    fn finalize_writes_log_and_summary() {
        let root = TempDir::new().unwrap();
        let mut run = BackupRun::create(root.path()).unwrap();
        run.total = 2;
        run.log(Severity::Info, None, "backup run started");
        run.log(Severity::Critical, Some("web"), "blockcommit failed");
        run.record("web", VmOutcome::Critical);

        let summary = run.finalize().unwrap();
        assert_eq!(summary.total, 2);

        let log = std::fs::read_to_string(run.dir().join("log.txt")).unwrap();
        assert!(log.contains("[CRITICAL] web: blockcommit failed"));
        assert!(log.contains("[INFO] -: backup run started"));

        let json = std::fs::read_to_string(run.dir().join("summary.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["total"], 2);
        assert_eq!(parsed["results"][0]["vm"], "web");
    }

    #[test]
    fn run_directory_is_timestamp_named() {
        let root = TempDir::new().unwrap();
        let run = BackupRun::create(root.path()).unwrap();
        assert_eq!(run.id.len(), "20260827-120000".len());
        assert!(run.dir().is_dir());
    }
}
