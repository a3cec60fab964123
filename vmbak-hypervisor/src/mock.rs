//! Scriptable in-memory hypervisor used by the state machine and
//! orchestrator tests.
//!
//! The mock records every adapter call, creates real overlay files in
//! the filesystem on snapshot (so cleanup behaviour is observable),
//! and can be told to fail snapshot creation per VM or block commit
//! per (VM, disk target).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use vmbak_core::error::{BackupError, Result};

use crate::types::{
    DiskDescriptor, SnapshotDisk, SnapshotHandle, VirtualMachine, VmDescription,
};
use crate::Hypervisor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListAll,
    Describe(String),
    Snapshot { vm: String, disks: usize },
    Commit { vm: String, target: String },
    DeleteArtifact(PathBuf),
}

#[derive(Default)]
pub struct MockHypervisor {
    vms: Vec<VmDescription>,
    fail_snapshot: HashSet<String>,
    fail_commit: HashSet<(String, String)>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vm(&mut self, desc: VmDescription) {
        self.vms.push(desc);
    }

    /// Make `create_disk_snapshot` fail for the named VM.
    pub fn fail_snapshot_for(&mut self, vm: &str) {
        self.fail_snapshot.insert(vm.to_string());
    }

    /// Make `commit_snapshot` fail for one disk of the named VM.
    pub fn fail_commit_for(&mut self, vm: &str, target: &str) {
        self.fail_commit.insert((vm.to_string(), target.to_string()));
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().expect("mock call log poisoned").clone()
    }

    pub fn commit_count(&self, vm: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Commit { vm: v, .. } if v == vm))
            .count()
    }

    pub fn snapshot_count(&self, vm: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Snapshot { vm: v, .. } if v == vm))
            .count()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().expect("mock call log poisoned").push(call);
    }
}

impl Hypervisor for MockHypervisor {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn list_all(&self) -> Result<Vec<VirtualMachine>> {
        self.record(MockCall::ListAll);
        Ok(self
            .vms
            .iter()
            .map(|desc| VirtualMachine::new(desc.name.clone()))
            .collect())
    }

    fn describe(&self, vm: &VirtualMachine) -> Result<VmDescription> {
        self.record(MockCall::Describe(vm.name.clone()));
        self.vms
            .iter()
            .find(|desc| desc.name == vm.name)
            .cloned()
            .ok_or_else(|| BackupError::Lookup(format!("no such domain: {}", vm.name)))
    }

    fn create_disk_snapshot(
        &self,
        vm: &VirtualMachine,
        disks: &[DiskDescriptor],
    ) -> Result<SnapshotHandle> {
        self.record(MockCall::Snapshot {
            vm: vm.name.clone(),
            disks: disks.len(),
        });

        if self.fail_snapshot.contains(&vm.name) {
            return Err(BackupError::Snapshot {
                vm: vm.name.clone(),
                message: "mock refused snapshot".into(),
            });
        }

        let mut snapshot_disks = Vec::with_capacity(disks.len());
        for disk in disks {
            let overlay = disk.overlay_path();
            // A real snapshot materializes the overlay next to the base
            // image; do the same so cleanup is verifiable.
            std::fs::write(&overlay, b"")?;
            snapshot_disks.push(SnapshotDisk {
                target: disk.target.clone(),
                base: disk.source.clone(),
                overlay,
            });
        }

        Ok(SnapshotHandle {
            vm: vm.name.clone(),
            disks: snapshot_disks,
        })
    }

    fn commit_snapshot(&self, vm: &VirtualMachine, target: &str) -> Result<()> {
        self.record(MockCall::Commit {
            vm: vm.name.clone(),
            target: target.to_string(),
        });

        if self
            .fail_commit
            .contains(&(vm.name.clone(), target.to_string()))
        {
            return Err(BackupError::Commit {
                vm: vm.name.clone(),
                target: target.to_string(),
                message: "mock refused blockcommit".into(),
            });
        }
        Ok(())
    }

    fn delete_snapshot_artifact(&self, path: &Path) -> Result<()> {
        self.record(MockCall::DeleteArtifact(path.to_path_buf()));
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BackupError::Cleanup(format!(
                "could not remove overlay {}: {err}",
                path.display()
            ))),
        }
    }
}
