//! The per-VM hot-backup state machine.
//!
//! One call drives one VM through config export, the marker guard,
//! the active (snapshot/copy/commit/cleanup) or inactive (plain copy)
//! path, optional compaction, and restore artifact generation. Every
//! error is converted into a `VmOutcome` here; nothing per-VM escapes
//! to the fleet loop.

use std::fs;
use std::path::Path;

use tracing::debug;
use vmbak_core::error::Result;
use vmbak_hypervisor::{Hypervisor, RunState, SnapshotHandle, VirtualMachine, VmDescription};
use vmbak_transfer::{compact_disk, copy_disk, is_compactable};

use crate::restore::write_restore_artifacts;
use crate::run::{BackupRun, Severity, VmOutcome};

/// Drive one VM through the full backup protocol.
///
/// `vm_dir` must already exist. Returns the outcome classification;
/// all detail lands in the run log.
pub fn backup_vm(
    hv: &dyn Hypervisor,
    run: &mut BackupRun,
    desc: &VmDescription,
    vm_dir: &Path,
    compact: bool,
) -> VmOutcome {
    let vm = VirtualMachine::new(desc.name.clone());
    let name = desc.name.as_str();

    // Entry guard: without both definition exports there is nothing to
    // restore from, so nothing else is worth attempting.
    if let Err(err) = export_configs(desc, vm_dir) {
        run.log(
            Severity::Error,
            Some(name),
            format!("config export failed: {err}"),
        );
        return VmOutcome::Failed;
    }

    // Marker guard: an active source path carrying the overlay marker
    // is a leftover from an interrupted run, not primary data.
    if let Some(disk) = desc.disks.iter().find(|d| d.carries_backup_marker()) {
        run.log(
            Severity::Error,
            Some(name),
            format!(
                "disk {} is still on backup overlay {}; refusing to back it up",
                disk.target,
                disk.source.display()
            ),
        );
        return VmOutcome::Failed;
    }

    let mut degraded = false;

    // Block-backed or diskless domains enumerate no file disks. A
    // snapshot request with an empty disk list would let the
    // hypervisor pick the disks and overlay paths itself, leaving the
    // VM pinned to overlays nothing here knows about. Save the
    // definition only.
    if desc.disks.is_empty() {
        run.log(
            Severity::Warning,
            Some(name),
            "no file-backed disks enumerated; saving definition only",
        );
    } else {
        match desc.run_state {
            RunState::Running => {
                let handle = match hv.create_disk_snapshot(&vm, &desc.disks) {
                    Ok(handle) => handle,
                    Err(err) => {
                        run.log(Severity::Error, Some(name), err.to_string());
                        return VmOutcome::Failed;
                    }
                };

                // The VM now writes to the overlays; the base images
                // hold the data as of the snapshot instant. Copy those.
                for disk in &handle.disks {
                    let dest = vm_dir.join(base_file_name(&disk.base));
                    if let Err(err) = copy_disk(&disk.base, &dest) {
                        degraded = true;
                        run.log(Severity::Error, Some(name), err.to_string());
                    }
                }

                // Merge back unconditionally, copy failures included.
                // Skipping the merge to salvage a failed copy would pin
                // the VM to a growing overlay indefinitely.
                if !commit_all(hv, run, &vm, &handle) {
                    return VmOutcome::Critical;
                }
            }
            RunState::Stopped => {
                for disk in &desc.disks {
                    let dest = vm_dir.join(base_file_name(&disk.source));
                    if let Err(err) = copy_disk(&disk.source, &dest) {
                        degraded = true;
                        run.log(Severity::Error, Some(name), err.to_string());
                    }
                }
            }
        }
    }

    // DISKS_TRANSFERRED reached. Compaction failures degrade but never
    // undo the already-valid uncompacted copy.
    if compact {
        for disk in &desc.disks {
            let dest = vm_dir.join(base_file_name(&disk.source));
            if !dest.exists() || !is_compactable(&dest, &disk.format) {
                continue;
            }
            debug!(vm = name, disk = %dest.display(), "compacting copied image");
            if let Err(err) = compact_disk(&dest) {
                degraded = true;
                run.log(Severity::Warning, Some(name), err.to_string());
            }
        }
    }

    // Restore artifacts are generated even for a degraded set: a
    // partial backup should stay restorable, with the degradation
    // visible in the log instead of the artifacts being discarded.
    if let Err(err) = write_restore_artifacts(vm_dir, desc) {
        degraded = true;
        run.log(
            Severity::Error,
            Some(name),
            format!("restore artifact generation failed: {err}"),
        );
    }

    if degraded {
        VmOutcome::Degraded
    } else {
        VmOutcome::Ok
    }
}

/// Commit every snapshotted disk back into its base image, then delete
/// the merged overlays best-effort. Returns false when any commit
/// failed, which is the critical data-loss condition.
fn commit_all(
    hv: &dyn Hypervisor,
    run: &mut BackupRun,
    vm: &VirtualMachine,
    handle: &SnapshotHandle,
) -> bool {
    let mut all_committed = true;

    for disk in &handle.disks {
        match hv.commit_snapshot(vm, &disk.target) {
            Ok(()) => {
                // Overlay is merged; removing it is best-effort only.
                if let Err(err) = hv.delete_snapshot_artifact(&disk.overlay) {
                    run.log(Severity::Warning, Some(&vm.name), err.to_string());
                }
            }
            Err(err) => {
                all_committed = false;
                run.log(
                    Severity::Critical,
                    Some(&vm.name),
                    format!(
                        "{err}; VM may still be writing to {}, manual 'virsh blockcommit' required",
                        disk.overlay.display()
                    ),
                );
            }
        }
    }

    all_committed
}

fn export_configs(desc: &VmDescription, vm_dir: &Path) -> Result<()> {
    fs::write(
        vm_dir.join(format!("{}.xml", desc.name)),
        &desc.config_local,
    )?;
    fs::write(
        vm_dir.join(format!("{}-portable.xml", desc.name)),
        &desc.config_portable,
    )?;
    Ok(())
}

fn base_file_name(path: &Path) -> std::ffi::OsString {
    path.file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "disk".into())
}
