//! Hypervisor abstraction for the backup orchestrator.
//!
//! Defines the `Hypervisor` trait the state machine drives, the data
//! model it observes, and the libvirt/virsh implementation. A
//! scriptable mock lives behind the `test-helpers` feature.

use std::path::Path;

use vmbak_core::error::Result;

pub mod libvirt;
pub mod types;

// When the `test-helpers` feature is enabled, include the mock hypervisor.
#[cfg(feature = "test-helpers")]
pub mod mock;

pub use libvirt::LibvirtHypervisor;
pub use types::{
    DiskDescriptor, DiskFormat, RunState, SnapshotDisk, SnapshotHandle, VirtualMachine,
    VmDescription, DEFAULT_SKIP_TOKEN, OVERLAY_SUFFIX, SNAPSHOT_NAME,
};

/// The control surface of one hypervisor.
///
/// The connection is treated as a stateless request/response handle,
/// safe for reuse across VMs within a run.
pub trait Hypervisor {
    /// Short identifier, e.g. "libvirt".
    fn name(&self) -> &'static str;

    /// Enumerate every domain the hypervisor knows, running or not.
    fn list_all(&self) -> Result<Vec<VirtualMachine>>;

    /// Full description of one domain, including both configuration
    /// export forms. Fails with `BackupError::Lookup` when the domain
    /// vanished between enumeration and this call.
    fn describe(&self, vm: &VirtualMachine) -> Result<VmDescription>;

    /// Skip convention: a case-sensitive substring match of `token`
    /// anywhere in the domain's free-text metadata. Deliberately
    /// simple; callers must not assume structured tagging.
    fn is_skip_marked(&self, desc: &VmDescription, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        desc.name.contains(token)
            || desc.title.contains(token)
            || desc.description.contains(token)
    }

    /// Create one atomic, disk-only, metadata-less snapshot across
    /// exactly the given disks of a running domain. Partial per-disk
    /// snapshotting is not offered; the disks must share a single
    /// point in time.
    ///
    /// # Errors
    ///
    /// `BackupError::Snapshot` when the hypervisor refuses (disk busy,
    /// insufficient space). Non-fatal to the run.
    fn create_disk_snapshot(
        &self,
        vm: &VirtualMachine,
        disks: &[DiskDescriptor],
    ) -> Result<SnapshotHandle>;

    /// Merge the overlay delta for one disk back into its base image
    /// and pivot the running domain onto the base path. Blocks until
    /// the merge really completed.
    ///
    /// # Errors
    ///
    /// `BackupError::Commit`, which is CRITICAL. The domain may now be writing
    /// to an orphaned overlay; the caller must stop further processing
    /// of this VM and surface the condition, not attempt recovery.
    fn commit_snapshot(&self, vm: &VirtualMachine, target: &str) -> Result<()>;

    /// Best-effort removal of a merged overlay file. A failure is a
    /// cleanup warning, never fatal; stale files can be removed by an
    /// operator later.
    fn delete_snapshot_artifact(&self, path: &Path) -> Result<()>;
}

/// Open a hypervisor connection for the given URI.
pub fn connect(uri: Option<&str>) -> Result<Box<dyn Hypervisor>> {
    #[cfg(feature = "test-helpers")]
    if uri == Some("mock") {
        return Ok(Box::new(mock::MockHypervisor::new()));
    }

    Ok(Box::new(LibvirtHypervisor::new(uri.map(String::from))?))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHypervisor;

    impl Hypervisor for NullHypervisor {
        fn name(&self) -> &'static str {
            "null"
        }
        fn list_all(&self) -> Result<Vec<VirtualMachine>> {
            Ok(vec![])
        }
        fn describe(&self, _vm: &VirtualMachine) -> Result<VmDescription> {
            unreachable!()
        }
        fn create_disk_snapshot(
            &self,
            _vm: &VirtualMachine,
            _disks: &[DiskDescriptor],
        ) -> Result<SnapshotHandle> {
            unreachable!()
        }
        fn commit_snapshot(&self, _vm: &VirtualMachine, _target: &str) -> Result<()> {
            unreachable!()
        }
        fn delete_snapshot_artifact(&self, _path: &Path) -> Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn skip_convention_searches_name_title_and_description() {
        let hv = NullHypervisor;

        let mut desc = VmDescription::new("web-frontend", RunState::Running);
        assert!(!hv.is_skip_marked(&desc, "nobackup"));

        desc.description = "scratch box, nobackup please".into();
        assert!(hv.is_skip_marked(&desc, "nobackup"));

        desc.description.clear();
        desc.title = "nobackup".into();
        assert!(hv.is_skip_marked(&desc, "nobackup"));

        let named = VmDescription::new("db-nobackup-test", RunState::Stopped);
        assert!(hv.is_skip_marked(&named, "nobackup"));
    }

    #[test]
    fn skip_match_is_case_sensitive() {
        let hv = NullHypervisor;
        let mut desc = VmDescription::new("web", RunState::Running);
        desc.description = "NOBACKUP".into();
        assert!(!hv.is_skip_marked(&desc, "nobackup"));
    }

    #[test]
    fn empty_token_never_matches() {
        let hv = NullHypervisor;
        let desc = VmDescription::new("web", RunState::Running);
        assert!(!hv.is_skip_marked(&desc, ""));
    }
}
