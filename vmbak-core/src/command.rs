//! External command execution helpers.
//!
//! Everything the orchestrator does against the outside world goes
//! through `virsh`, `qemu-img` or `sendmail`; these helpers capture
//! output and map non-zero exits onto `BackupError::Command` with the
//! trimmed stderr as the message.

// Standard library
use std::ffi::OsStr;

// External crates
use duct::cmd;
use tracing::debug;
use which::which;

use crate::error::{BackupError, Result};

/// Check whether an external tool is available on PATH.
pub fn is_tool_installed(name: &str) -> bool {
    which(name).is_ok()
}

fn render_command<A: AsRef<OsStr>>(command: &str, args: &[A]) -> String {
    let mut rendered = String::from(command);
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.as_ref().to_string_lossy());
    }
    rendered
}

/// Run a command and return its stdout as a string.
///
/// Stderr is captured and carried in the error on a non-zero exit so
/// the run log can show what the tool actually complained about.
pub fn run_capture<A: AsRef<OsStr>>(command: &str, args: &[A]) -> Result<String> {
    let rendered = render_command(command, args);
    debug!(command = %rendered, "running external command");

    let output = cmd(command, args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()?;

    if !output.status.success() {
        return Err(BackupError::Command {
            command: rendered,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command for its side effect only.
pub fn run_checked<A: AsRef<OsStr>>(command: &str, args: &[A]) -> Result<()> {
    run_capture(command, args).map(|_| ())
}

/// Run a command feeding `input` on stdin (used for sendmail).
pub fn run_with_input<A: AsRef<OsStr>>(command: &str, args: &[A], input: &str) -> Result<()> {
    let rendered = render_command(command, args);
    debug!(command = %rendered, "running external command with stdin");

    let output = cmd(command, args)
        .stdin_bytes(input.as_bytes().to_vec())
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()?;

    if !output.status.success() {
        return Err(BackupError::Command {
            command: rendered,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_capture_returns_stdout() {
        let out = run_capture("echo", &["hello"]).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn run_capture_maps_nonzero_exit_to_command_error() {
        let err = run_capture("false", &[] as &[&str]).unwrap_err();
        match err {
            BackupError::Command { command, .. } => assert_eq!(command, "false"),
            other => panic!("expected Command error, got {other:?}"),
        }
    }

    #[test]
    fn run_with_input_feeds_stdin() {
        // `cat` exits zero after consuming stdin.
        run_with_input("cat", &[] as &[&str], "summary body\n").unwrap();
    }

    #[test]
    fn tool_detection() {
        assert!(is_tool_installed("echo") || is_tool_installed("sh"));
        assert!(!is_tool_installed("definitely-not-a-real-tool-xyz"));
    }
}
