// CLI argument parsing and definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "vmbak")]
#[command(about = "Hot backup orchestrator for libvirt virtual machines")]
#[command(version)]
pub struct Args {
    /// Backup destination root (must be an existing directory)
    pub root: PathBuf,

    /// Delete backup sets older than this many days after the run
    /// (0 disables the retention sweep)
    #[arg(long, default_value_t = 0)]
    pub keep_days: i64,

    /// Mail the run summary to this address via sendmail
    #[arg(long)]
    pub mail_to: Option<String>,

    /// Substring in a VM's name, title or description that excludes it
    /// from backups
    #[arg(long, default_value = "nobackup")]
    pub skip_token: String,

    /// Skip qcow2 compaction of the copied images
    #[arg(long)]
    pub no_compact: bool,

    /// Libvirt connection URI (passed to virsh -c)
    #[arg(long)]
    pub connect: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["vmbak", "/backups"]);
        assert_eq!(args.root, PathBuf::from("/backups"));
        assert_eq!(args.keep_days, 0);
        assert_eq!(args.skip_token, "nobackup");
        assert!(!args.no_compact);
        assert!(args.mail_to.is_none());
    }

    #[test]
    fn full_invocation() {
        let args = Args::parse_from([
            "vmbak",
            "/backups",
            "--keep-days",
            "14",
            "--mail-to",
            "ops@example.net",
            "--skip-token",
            "NOBAK",
            "--no-compact",
            "--connect",
            "qemu:///system",
        ]);
        assert_eq!(args.keep_days, 14);
        assert_eq!(args.mail_to.as_deref(), Some("ops@example.net"));
        assert_eq!(args.skip_token, "NOBAK");
        assert!(args.no_compact);
        assert_eq!(args.connect.as_deref(), Some("qemu:///system"));
    }
}
