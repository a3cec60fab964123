//! Fleet orchestration: enumerate every VM, apply the skip convention,
//! drive the per-VM state machine, then sweep expired backup sets.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone};
use fs2::FileExt;
use tracing::debug;
use vmbak_core::error::{BackupError, Result};
use vmbak_hypervisor::Hypervisor;

use crate::machine::backup_vm;
use crate::run::{BackupRun, RunSummary, Severity, VmOutcome};

pub struct OrchestratorConfig {
    /// Backup destination root; one subdirectory per run is created here.
    pub root: PathBuf,
    /// Backup sets older than this many days are deleted after the run.
    /// Zero or negative disables the sweep entirely.
    pub keep_days: i64,
    /// Substring marking a VM as excluded from backups.
    pub skip_token: String,
    /// Compact copied qcow2 images after transfer.
    pub compact: bool,
}

/// Advisory lock on the backup root, held for the whole run so two
/// orchestrator invocations cannot collide on the same run directory.
struct RunLock {
    file: fs::File,
}

impl RunLock {
    const LOCK_FILE: &'static str = ".vmbak.lock";

    fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(Self::LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            BackupError::Usage(format!(
                "another backup run already holds the lock on {}",
                root.display()
            ))
        })?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// One full orchestrator invocation: backup every VM, sweep retention,
/// finalize the run report.
pub fn run_fleet_backup(hv: &dyn Hypervisor, cfg: &OrchestratorConfig) -> Result<RunSummary> {
    if !cfg.root.is_dir() {
        return Err(BackupError::Usage(format!(
            "backup root {} is not a directory",
            cfg.root.display()
        )));
    }

    let _lock = RunLock::acquire(&cfg.root)?;
    let mut run = BackupRun::create(&cfg.root)?;
    run.log(
        Severity::Info,
        None,
        format!("backup run {} started via {}", run.id, hv.name()),
    );

    let vms = hv.list_all()?;
    for vm in &vms {
        run.total += 1;

        let desc = match hv.describe(vm) {
            Ok(desc) => desc,
            Err(BackupError::Lookup(message)) => {
                // The domain vanished between enumeration and now;
                // skip it, never crash the run.
                run.log(Severity::Warning, Some(&vm.name), message);
                run.record(&vm.name, VmOutcome::Failed);
                continue;
            }
            Err(err) => {
                run.log(Severity::Error, Some(&vm.name), err.to_string());
                run.record(&vm.name, VmOutcome::Failed);
                continue;
            }
        };

        // Startup orphan scan: an overlay-marked active disk means an
        // earlier run died mid-protocol. Surface it loudly; recovery is
        // an operator decision, never automatic.
        for disk in desc.disks.iter().filter(|d| d.carries_backup_marker()) {
            run.log(
                Severity::Critical,
                Some(&desc.name),
                format!(
                    "disk {} is running on orphaned overlay {}; \
                     manual 'virsh blockcommit {} {} --active --pivot' required",
                    disk.target,
                    disk.source.display(),
                    desc.name,
                    disk.target
                ),
            );
        }

        if hv.is_skip_marked(&desc, &cfg.skip_token) {
            run.skipped += 1;
            run.log(
                Severity::Info,
                Some(&desc.name),
                format!("skip token '{}' present, not backing up", cfg.skip_token),
            );
            continue;
        }

        let vm_dir = run.vm_dir(&desc.name);
        if let Err(err) = fs::create_dir_all(&vm_dir) {
            run.log(
                Severity::Error,
                Some(&desc.name),
                format!("could not create {}: {err}", vm_dir.display()),
            );
            run.record(&desc.name, VmOutcome::Failed);
            continue;
        }

        let outcome = backup_vm(hv, &mut run, &desc, &vm_dir, cfg.compact);
        run.record(&desc.name, outcome);
    }

    retention_sweep(&mut run, &cfg.root, cfg.keep_days)?;
    run.log(Severity::Info, None, "backup run finished");
    run.finalize()
}

/// Delete backup-set directories under `root` older than `keep_days`.
///
/// Runs exactly once per invocation, after all VM processing, and is
/// independent of whether the current run succeeded. A non-positive
/// age disables the sweep; it never means "delete everything".
pub fn retention_sweep(run: &mut BackupRun, root: &Path, keep_days: i64) -> Result<()> {
    if keep_days <= 0 {
        run.log(Severity::Info, None, "retention sweep disabled");
        return Ok(());
    }

    let cutoff = Local::now() - Duration::days(keep_days);
    let current_id = run.id.clone();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == current_id {
            continue;
        }

        // Only directories whose name is a run id are backup sets.
        // Anything else under the root is not ours to delete, no
        // matter how old it looks.
        let created = match parse_run_id(&name) {
            Some(created) => created,
            None => {
                debug!(dir = %path.display(), "not a backup set, leaving alone");
                continue;
            }
        };

        if created < cutoff {
            match fs::remove_dir_all(&path) {
                Ok(()) => run.log(
                    Severity::Info,
                    None,
                    format!("retention: removed backup set {name}"),
                ),
                Err(err) => run.log(
                    Severity::Warning,
                    None,
                    format!("retention: could not remove {name}: {err}"),
                ),
            }
        }
    }
    Ok(())
}

fn parse_run_id(name: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(name, "%Y%m%d-%H%M%S").ok()?;
    Local.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn run_id_parses_back_to_a_timestamp() {
        let parsed = parse_run_id("20260115-031500").unwrap();
        assert_eq!(parsed.format("%Y%m%d-%H%M%S").to_string(), "20260115-031500");
        assert!(parse_run_id("not-a-run").is_none());
        assert!(parse_run_id("lost+found").is_none());
    }

    #[test]
    fn sweep_disabled_by_non_positive_age() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("20000101-000000")).unwrap();
        let mut run = BackupRun::create(root.path()).unwrap();

        retention_sweep(&mut run, root.path(), 0).unwrap();
        assert!(root.path().join("20000101-000000").exists());

        retention_sweep(&mut run, root.path(), -3).unwrap();
        assert!(root.path().join("20000101-000000").exists());
    }

    #[test]
    fn sweep_removes_only_expired_sets() {
        let root = TempDir::new().unwrap();
        let expired = root.path().join("20000101-000000");
        let fresh_id = (Local::now() - Duration::days(1))
            .format("%Y%m%d-%H%M%S")
            .to_string();
        let fresh = root.path().join(&fresh_id);
        let foreign = root.path().join("lost+found");
        fs::create_dir(&expired).unwrap();
        fs::create_dir(&fresh).unwrap();
        fs::create_dir(&foreign).unwrap();

        let mut run = BackupRun::create(root.path()).unwrap();
        retention_sweep(&mut run, root.path(), 30).unwrap();

        assert!(!expired.exists());
        assert!(fresh.exists());
        assert!(foreign.exists());
        // The current run directory is never swept.
        assert!(run.dir().exists());
    }

    #[test]
    fn sweep_never_touches_foreign_directories_however_old() {
        let root = TempDir::new().unwrap();
        let archive = root.path().join("operator-archive");
        fs::create_dir(&archive).unwrap();
        fs::write(archive.join("important.txt"), "keep me").unwrap();

        // Age the directory well past any plausible cutoff; only the
        // name decides whether the sweep may delete it.
        let ancient = std::time::SystemTime::now() - std::time::Duration::from_secs(10 * 365 * 86_400);
        fs::File::open(&archive)
            .unwrap()
            .set_modified(ancient)
            .unwrap();

        let mut run = BackupRun::create(root.path()).unwrap();
        retention_sweep(&mut run, root.path(), 7).unwrap();

        assert!(archive.exists());
        assert!(archive.join("important.txt").exists());
    }

    #[test]
    fn lock_excludes_concurrent_runs() {
        let root = TempDir::new().unwrap();
        let first = RunLock::acquire(root.path()).unwrap();
        let second = RunLock::acquire(root.path());
        assert!(matches!(second, Err(BackupError::Usage(_))));
        drop(first);
        RunLock::acquire(root.path()).unwrap();
    }
}
