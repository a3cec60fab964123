pub mod command;
pub mod error;
pub mod output_macros;

pub use command::{is_tool_installed, run_capture, run_checked, run_with_input};
pub use error::{BackupError, Result};
