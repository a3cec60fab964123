// Standard library
use std::process::ExitCode;

// External crates
use clap::Parser;
use tracing::info;
use uuid::Uuid;

// Internal imports
use vmbak_backup::{run_fleet_backup, OrchestratorConfig};
use vmbak_core::error::{BackupError, Result};
use vmbak_core::vmbak_error;

// Local modules
mod cli;
mod notify;

use cli::Args;
use notify::{ConsoleNotifier, MailNotifier, Notifier};

fn main() -> ExitCode {
    let _log_guard = vmbak_logging::init_subscriber();
    let args = Args::parse();

    if let Err(err) = execute(args) {
        vmbak_error!("{}", err);
        return match err {
            BackupError::Usage(_) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        };
    }
    ExitCode::SUCCESS
}

fn execute(args: Args) -> Result<()> {
    // Usage validation happens before any backup work begins.
    if !args.root.is_dir() {
        return Err(BackupError::Usage(format!(
            "backup root {} is not an existing directory",
            args.root.display()
        )));
    }

    let request_id = Uuid::new_v4();
    let _span = tracing::info_span!("vmbak", request_id = %request_id).entered();
    info!(root = %args.root.display(), "starting backup run");

    let hypervisor = vmbak_hypervisor::connect(args.connect.as_deref())?;
    let cfg = OrchestratorConfig {
        root: args.root.clone(),
        keep_days: args.keep_days,
        skip_token: args.skip_token.clone(),
        compact: !args.no_compact,
    };

    let summary = run_fleet_backup(hypervisor.as_ref(), &cfg)?;

    ConsoleNotifier.notify(&summary)?;
    if let Some(recipient) = args.mail_to {
        MailNotifier::new(recipient).notify(&summary)?;
    }

    Ok(())
}
