use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for a backup run.
///
/// Per-VM errors (`Snapshot`, `Copy`, `Compaction`, `Commit`, `Cleanup`)
/// are caught at the state machine boundary and turned into a per-VM
/// outcome; they never abort the fleet loop. `Commit` is the one
/// critical condition: the VM may still be writing to an overlay the
/// run believes is merged.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Domain lookup failed: {0}")]
    Lookup(String),

    #[error("Snapshot creation failed for '{vm}': {message}")]
    Snapshot { vm: String, message: String },

    #[error("Disk copy failed: {} -> {}: {message}", .source_path.display(), .dest_path.display())]
    Copy {
        source_path: PathBuf,
        dest_path: PathBuf,
        message: String,
    },

    #[error("Compaction failed for {}: {message}", .path.display())]
    Compaction { path: PathBuf, message: String },

    #[error("Block commit failed for '{vm}' disk '{target}': {message}")]
    Commit {
        vm: String,
        target: String,
        message: String,
    },

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Command failed: {command}: {message}")]
    Command { command: String, message: String },

    #[error("Unparseable {what} output: {line:?}")]
    Parse { what: String, line: String },

    #[error("Dependency not found: {0}")]
    Dependency(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackupError {
    /// True for the data-loss class of failures that must be tagged
    /// CRITICAL wherever they surface.
    pub fn is_critical(&self) -> bool {
        matches!(self, BackupError::Commit { .. })
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_is_the_only_critical_class() {
        let commit = BackupError::Commit {
            vm: "web".into(),
            target: "vda".into(),
            message: "pivot refused".into(),
        };
        assert!(commit.is_critical());

        let snapshot = BackupError::Snapshot {
            vm: "web".into(),
            message: "disk busy".into(),
        };
        assert!(!snapshot.is_critical());
        assert!(!BackupError::Usage("bad root".into()).is_critical());
    }

    #[test]
    fn copy_error_names_both_paths() {
        let err = BackupError::Copy {
            source_path: "/srv/a.qcow2".into(),
            dest_path: "/backup/a.qcow2".into(),
            message: "no space".into(),
        };
        let text = err.to_string();
        assert!(text.contains("/srv/a.qcow2"));
        assert!(text.contains("/backup/a.qcow2"));
    }
}
