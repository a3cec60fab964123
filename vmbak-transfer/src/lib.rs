//! Disk transfer engine: byte-faithful copies of disk images and
//! optional space-reclaiming compaction of copy-on-write copies.

use std::path::Path;

use tracing::{debug, info};
use vmbak_core::command::{is_tool_installed, run_checked};
use vmbak_core::error::{BackupError, Result};
use vmbak_hypervisor::DiskFormat;

/// Copy one disk image to the destination, byte for byte.
///
/// A failure here degrades the VM's result; for a running VM the
/// caller must still proceed to the merge-back step, or the VM stays
/// pinned to a growing overlay indefinitely.
pub fn copy_disk(source: &Path, dest: &Path) -> Result<u64> {
    debug!(source = %source.display(), dest = %dest.display(), "copying disk image");
    std::fs::copy(source, dest).map_err(|err| BackupError::Copy {
        source_path: source.to_path_buf(),
        dest_path: dest.to_path_buf(),
        message: err.to_string(),
    })
}

/// Whether a copied image can be compacted. Decided by the declared
/// format with a file-extension fallback, never by content sniffing.
pub fn is_compactable(path: &Path, format: &DiskFormat) -> bool {
    match format {
        DiskFormat::Qcow2 => true,
        DiskFormat::Raw | DiskFormat::Other(_) => {
            matches!(path.extension().and_then(|e| e.to_str()), Some("qcow2"))
        }
    }
}

/// Rewrite a qcow2 copy to reclaim space freed by deleted blocks.
///
/// `qemu-img convert` writes into a temporary sibling file which is
/// atomically renamed over the original on success. On any failure the
/// pre-compaction copy is left untouched; there is never a moment with
/// zero valid copies of the disk.
pub fn compact_disk(path: &Path) -> Result<()> {
    if !is_tool_installed("qemu-img") {
        return Err(BackupError::Dependency("qemu-img".into()));
    }

    let dir = path.parent().ok_or_else(|| BackupError::Compaction {
        path: path.to_path_buf(),
        message: "image path has no parent directory".into(),
    })?;

    let tmp = tempfile::Builder::new()
        .prefix(".compact-")
        .suffix(".qcow2")
        .tempfile_in(dir)
        .map_err(|err| BackupError::Compaction {
            path: path.to_path_buf(),
            message: format!("could not create temporary output: {err}"),
        })?;

    let source = path.to_string_lossy().into_owned();
    let target = tmp.path().to_string_lossy().into_owned();
    run_checked("qemu-img", &["convert", "-O", "qcow2", &source, &target]).map_err(|err| {
        BackupError::Compaction {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    })?;

    tmp.persist(path).map_err(|err| BackupError::Compaction {
        path: path.to_path_buf(),
        message: format!("could not swap compacted image in: {err}"),
    })?;

    info!(path = %path.display(), "compacted qcow2 image");
    Ok(())
}
