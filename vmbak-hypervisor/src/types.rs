//! Data model observed through the hypervisor adapter.

use std::path::PathBuf;

/// Snapshot name used for every hot-backup overlay.
pub const SNAPSHOT_NAME: &str = "vmbak";

/// Suffix carried by overlay files while a hot backup is in flight.
///
/// A disk whose active source path already contains this marker is an
/// orphan from an interrupted run and must never be backed up as
/// primary data.
pub const OVERLAY_SUFFIX: &str = ".vmbak";

/// Default skip token searched for in a VM's free-text metadata.
pub const DEFAULT_SKIP_TOKEN: &str = "nobackup";

/// Opaque handle to a domain known to the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachine {
    pub name: String,
}

impl VirtualMachine {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskFormat {
    Raw,
    Qcow2,
    Other(String),
}

impl DiskFormat {
    /// Recognize a format from a file extension. This is a documented
    /// convention of the system; content sniffing is deliberately
    /// avoided.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("qcow2") => DiskFormat::Qcow2,
            Some("raw") | Some("img") | None => DiskFormat::Raw,
            Some(other) => DiskFormat::Other(other.to_string()),
        }
    }
}

/// One attached disk of a domain.
#[derive(Debug, Clone)]
pub struct DiskDescriptor {
    /// Attachment point, e.g. `vda`.
    pub target: String,
    /// Active source image path.
    pub source: PathBuf,
    pub format: DiskFormat,
}

impl DiskDescriptor {
    pub fn new(target: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let format = DiskFormat::from_path(&source);
        Self {
            target: target.into(),
            source,
            format,
        }
    }

    /// True when the active source path is a backup overlay left over
    /// from an interrupted run.
    pub fn carries_backup_marker(&self) -> bool {
        self.source.to_string_lossy().contains(OVERLAY_SUFFIX)
    }

    /// Path the hot-backup overlay is placed at, next to the base image.
    pub fn overlay_path(&self) -> PathBuf {
        let stem = self
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "disk".to_string());
        self.source.with_file_name(format!("{stem}{OVERLAY_SUFFIX}"))
    }
}

/// Everything the orchestrator needs to know about one domain,
/// captured in a single `describe` call.
#[derive(Debug, Clone)]
pub struct VmDescription {
    pub name: String,
    pub run_state: RunState,
    pub disks: Vec<DiskDescriptor>,
    /// Full definition, host-specific identifiers preserved.
    pub config_local: String,
    /// Migratable definition, host-specific identifiers dropped.
    pub config_portable: String,
    /// Free-text title, part of the skip-token search space.
    pub title: String,
    /// Free-text description, part of the skip-token search space.
    pub description: String,
}

impl VmDescription {
    pub fn new(name: impl Into<String>, run_state: RunState) -> Self {
        let name = name.into();
        let config_local = format!("<domain>\n  <name>{name}</name>\n</domain>\n");
        Self {
            config_portable: config_local.clone(),
            config_local,
            name,
            run_state,
            disks: Vec::new(),
            title: String::new(),
            description: String::new(),
        }
    }
}

/// One disk covered by an in-flight snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotDisk {
    pub target: String,
    /// Pre-snapshot image; holds the data as of the snapshot instant.
    pub base: PathBuf,
    /// Overlay receiving writes while the backup runs.
    pub overlay: PathBuf,
}

/// A transient, disk-only, metadata-less snapshot across all disks of
/// one domain. Every handle must end the backup attempt either
/// committed back or deleted; anything else is an orphan.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    pub vm: String,
    pub disks: Vec<SnapshotDisk>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn format_recognition_is_extension_based() {
        assert_eq!(
            DiskFormat::from_path(Path::new("/srv/a.qcow2")),
            DiskFormat::Qcow2
        );
        assert_eq!(
            DiskFormat::from_path(Path::new("/srv/a.raw")),
            DiskFormat::Raw
        );
        assert_eq!(
            DiskFormat::from_path(Path::new("/srv/a.img")),
            DiskFormat::Raw
        );
        assert_eq!(
            DiskFormat::from_path(Path::new("/srv/a.vmdk")),
            DiskFormat::Other("vmdk".into())
        );
    }

    #[test]
    fn overlay_sits_next_to_the_base_image() {
        let disk = DiskDescriptor::new("vda", "/var/lib/libvirt/images/web.qcow2");
        assert_eq!(
            disk.overlay_path(),
            Path::new("/var/lib/libvirt/images/web.vmbak")
        );
    }

    #[test]
    fn marker_detection() {
        let clean = DiskDescriptor::new("vda", "/srv/web.qcow2");
        assert!(!clean.carries_backup_marker());

        let orphan = DiskDescriptor::new("vda", "/srv/web.vmbak");
        assert!(orphan.carries_backup_marker());
    }
}
