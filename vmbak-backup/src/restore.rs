//! Restore artifact generation.
//!
//! Each backed-up VM gets two self-contained shell scripts, one per
//! configuration form. Generation is pure text output; no hypervisor
//! command is executed here. The scripts are idempotent: a disk image
//! is only put back when nothing exists at its original path.

use std::fs;
use std::path::Path;

use vmbak_core::error::Result;
use vmbak_hypervisor::VmDescription;

pub fn write_restore_artifacts(vm_dir: &Path, desc: &VmDescription) -> Result<()> {
    let local_xml = format!("{}.xml", desc.name);
    let portable_xml = format!("{}-portable.xml", desc.name);

    // The local form preserves host-specific identifiers; the portable
    // form drops them and suits redefinition on a different host.
    write_script(
        vm_dir,
        "restore-local.sh",
        desc,
        &local_xml,
        "local definition (host-specific identifiers preserved)",
    )?;
    write_script(
        vm_dir,
        "restore-portable.sh",
        desc,
        &portable_xml,
        "portable definition (host-specific identifiers dropped)",
    )?;
    Ok(())
}

fn write_script(
    vm_dir: &Path,
    file_name: &str,
    desc: &VmDescription,
    xml_file: &str,
    form: &str,
) -> Result<()> {
    let mut script = format!(
        "#!/bin/sh\n\
         # Restore VM '{name}' from this backup set using the {form}.\n\
         # Safe to re-run: existing disk images are never overwritten.\n\
         set -e\n\
         cd \"$(dirname \"$0\")\"\n\
         \n\
         virsh define \"{xml_file}\"\n\
         \n",
        name = desc.name,
    );

    for disk in &desc.disks {
        let image = disk
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "disk".to_string());
        script.push_str(&format!(
            "# {target}: copy-if-absent back to the original source path\n\
             [ -e \"{original}\" ] || cp \"{image}\" \"{original}\"\n",
            target = disk.target,
            original = disk.source.display(),
        ));
    }

    script.push_str(&format!(
        "\necho \"Restore of '{}' complete.\"\n",
        desc.name
    ));

    let path = vm_dir.join(file_name);
    fs::write(&path, script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vmbak_hypervisor::{DiskDescriptor, RunState};

    fn described_vm() -> VmDescription {
        let mut desc = VmDescription::new("web", RunState::Running);
        desc.disks
            .push(DiskDescriptor::new("vda", "/srv/images/web.qcow2"));
        desc.disks
            .push(DiskDescriptor::new("vdb", "/srv/images/web-data.raw"));
        desc
    }

    #[test]
    fn both_restore_variants_are_written() {
        let dir = TempDir::new().unwrap();
        write_restore_artifacts(dir.path(), &described_vm()).unwrap();

        let local = fs::read_to_string(dir.path().join("restore-local.sh")).unwrap();
        let portable = fs::read_to_string(dir.path().join("restore-portable.sh")).unwrap();

        assert!(local.contains("virsh define \"web.xml\""));
        assert!(portable.contains("virsh define \"web-portable.xml\""));
    }

    #[test]
    fn disk_placement_is_copy_if_absent() {
        let dir = TempDir::new().unwrap();
        write_restore_artifacts(dir.path(), &described_vm()).unwrap();

        let script = fs::read_to_string(dir.path().join("restore-local.sh")).unwrap();
        // Re-running must never overwrite an existing image.
        assert!(script
            .contains("[ -e \"/srv/images/web.qcow2\" ] || cp \"web.qcow2\" \"/srv/images/web.qcow2\""));
        assert!(script.contains(
            "[ -e \"/srv/images/web-data.raw\" ] || cp \"web-data.raw\" \"/srv/images/web-data.raw\""
        ));
    }

    #[test]
    fn generation_runs_no_hypervisor_commands() {
        // The scripts defer everything; generation only writes files.
        let dir = TempDir::new().unwrap();
        write_restore_artifacts(dir.path(), &described_vm()).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn scripts_are_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        write_restore_artifacts(dir.path(), &described_vm()).unwrap();
        let mode = fs::metadata(dir.path().join("restore-local.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
