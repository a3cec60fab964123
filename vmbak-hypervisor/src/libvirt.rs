//! Libvirt implementation of the hypervisor adapter, shelling out to
//! `virsh` the same way the provider layer talks to other VM CLIs.

use std::path::Path;

use tracing::{debug, warn};
use vmbak_core::command::{is_tool_installed, run_capture};
use vmbak_core::error::{BackupError, Result};

use crate::types::{
    DiskDescriptor, RunState, SnapshotDisk, SnapshotHandle, VirtualMachine, VmDescription,
    SNAPSHOT_NAME,
};
use crate::Hypervisor;

pub struct LibvirtHypervisor {
    uri: Option<String>,
}

impl LibvirtHypervisor {
    pub fn new(uri: Option<String>) -> Result<Self> {
        if !is_tool_installed("virsh") {
            return Err(BackupError::Dependency("virsh".into()));
        }
        Ok(Self { uri })
    }

    fn virsh<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let mut full: Vec<String> = Vec::with_capacity(args.len() + 2);
        if let Some(uri) = &self.uri {
            full.push("-c".into());
            full.push(uri.clone());
        }
        full.extend(args.iter().map(|a| a.as_ref().to_string()));
        run_capture("virsh", &full)
    }
}

impl Hypervisor for LibvirtHypervisor {
    fn name(&self) -> &'static str {
        "libvirt"
    }

    fn list_all(&self) -> Result<Vec<VirtualMachine>> {
        let output = self.virsh(&["list", "--all", "--name"])?;
        Ok(parse_name_list(&output)
            .into_iter()
            .map(VirtualMachine::new)
            .collect())
    }

    fn describe(&self, vm: &VirtualMachine) -> Result<VmDescription> {
        // Any virsh failure here means the domain vanished (or was
        // renamed) between enumeration and processing; the fleet loop
        // skips it rather than crashing.
        let lookup = |err: BackupError| BackupError::Lookup(format!("{}: {err}", vm.name));

        let state = self.virsh(&["domstate", &vm.name]).map_err(lookup)?;
        let blklist = self
            .virsh(&["domblklist", &vm.name, "--details"])
            .map_err(lookup)?;
        let config_local = self.virsh(&["dumpxml", &vm.name]).map_err(lookup)?;
        let config_portable = self
            .virsh(&["dumpxml", "--migratable", &vm.name])
            .map_err(lookup)?;

        // Title and description are optional; older libvirt returns an
        // error for domains that never had one.
        let title = self
            .virsh(&["desc", "--title", &vm.name])
            .unwrap_or_default();
        let description = self.virsh(&["desc", &vm.name]).unwrap_or_default();

        let disks = parse_domblklist(&blklist)?
            .into_iter()
            .map(|(target, source)| DiskDescriptor::new(target, source))
            .collect();

        Ok(VmDescription {
            name: vm.name.clone(),
            run_state: parse_run_state(&state),
            disks,
            config_local,
            config_portable,
            title: title.trim().to_string(),
            description: description.trim().to_string(),
        })
    }

    fn create_disk_snapshot(
        &self,
        vm: &VirtualMachine,
        disks: &[DiskDescriptor],
    ) -> Result<SnapshotHandle> {
        // One atomic call across all disks. Per-disk snapshotting would
        // leave the disks at inconsistent points in time.
        let mut args: Vec<String> = vec![
            "snapshot-create-as".into(),
            vm.name.clone(),
            SNAPSHOT_NAME.into(),
            "--disk-only".into(),
            "--atomic".into(),
            "--no-metadata".into(),
        ];

        let mut snapshot_disks = Vec::with_capacity(disks.len());
        for disk in disks {
            let overlay = disk.overlay_path();
            args.push("--diskspec".into());
            args.push(format!("{},file={}", disk.target, overlay.display()));
            snapshot_disks.push(SnapshotDisk {
                target: disk.target.clone(),
                base: disk.source.clone(),
                overlay,
            });
        }

        debug!(vm = %vm.name, disks = disks.len(), "creating disk-only snapshot");
        self.virsh(&args).map_err(|err| BackupError::Snapshot {
            vm: vm.name.clone(),
            message: err.to_string(),
        })?;

        Ok(SnapshotHandle {
            vm: vm.name.clone(),
            disks: snapshot_disks,
        })
    }

    fn commit_snapshot(&self, vm: &VirtualMachine, target: &str) -> Result<()> {
        // --wait makes the call synchronous: blockcommit must really
        // finish and pivot before we report success.
        self.virsh(&[
            "blockcommit",
            &vm.name,
            target,
            "--active",
            "--pivot",
            "--wait",
        ])
        .map_err(|err| BackupError::Commit {
            vm: vm.name.clone(),
            target: target.to_string(),
            message: err.to_string(),
        })?;
        Ok(())
    }

    fn delete_snapshot_artifact(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "overlay already gone during cleanup");
                Ok(())
            }
            Err(err) => Err(BackupError::Cleanup(format!(
                "could not remove overlay {}: {err}",
                path.display()
            ))),
        }
    }
}

fn parse_name_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_run_state(output: &str) -> RunState {
    // virsh reports "running", "paused", "shut off", "crashed", ...
    // Only a running domain needs the snapshot/commit protocol.
    if output.trim() == "running" {
        RunState::Running
    } else {
        RunState::Stopped
    }
}

/// Parse `virsh domblklist --details` into (target, source) pairs,
/// keeping file-backed real disks only (no cdroms, no detached media).
fn parse_domblklist(output: &str) -> Result<Vec<(String, String)>> {
    let mut disks = Vec::new();
    for line in output.lines().skip_while(|l| !l.starts_with('-')).skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(BackupError::Parse {
                what: "domblklist".into(),
                line: line.to_string(),
            });
        }
        let (kind, device, target, source) = (fields[0], fields[1], fields[2], fields[3]);
        if kind == "file" && device == "disk" && source != "-" {
            disks.push((target.to_string(), source.to_string()));
        }
    }
    Ok(disks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLKLIST: &str = "\
 Type   Device   Target   Source
---------------------------------------------------------
 file   disk     vda      /var/lib/libvirt/images/web.qcow2
 file   disk     vdb      /var/lib/libvirt/images/web-data.raw
 file   cdrom    sda      -
 block  disk     vdc      /dev/mapper/lv0
";

    #[test]
    fn domblklist_keeps_file_backed_disks_only() {
        let disks = parse_domblklist(BLKLIST).unwrap();
        assert_eq!(
            disks,
            vec![
                (
                    "vda".to_string(),
                    "/var/lib/libvirt/images/web.qcow2".to_string()
                ),
                (
                    "vdb".to_string(),
                    "/var/lib/libvirt/images/web-data.raw".to_string()
                ),
            ]
        );
    }

    #[test]
    fn domblklist_rejects_truncated_rows() {
        let bad = " Type   Device   Target   Source\n----\n file disk vda\n";
        assert!(parse_domblklist(bad).is_err());
    }

    #[test]
    fn name_list_drops_blank_lines() {
        let names = parse_name_list("web\n\ndb\n \n");
        assert_eq!(names, vec!["web".to_string(), "db".to_string()]);
    }

    #[test]
    fn run_state_is_binary() {
        assert_eq!(parse_run_state("running\n"), RunState::Running);
        assert_eq!(parse_run_state("shut off\n"), RunState::Stopped);
        assert_eq!(parse_run_state("paused\n"), RunState::Stopped);
    }
}
