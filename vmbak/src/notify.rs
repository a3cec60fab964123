//! Run summary delivery.
//!
//! The orchestrator emits the summary data; how it reaches an operator
//! is pluggable. The console notifier echoes it, the mail notifier
//! pipes an RFC-822-shaped message into sendmail.

use tracing::info;
use vmbak_backup::RunSummary;
use vmbak_core::command::run_with_input;
use vmbak_core::error::Result;
use vmbak_core::vmbak_println;

pub trait Notifier {
    fn notify(&self, summary: &RunSummary) -> Result<()>;
}

pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, summary: &RunSummary) -> Result<()> {
        vmbak_println!("{}", summary.render_text());
        Ok(())
    }
}

pub struct MailNotifier {
    recipient: String,
}

impl MailNotifier {
    pub fn new(recipient: String) -> Self {
        Self { recipient }
    }

    fn render_message(&self, summary: &RunSummary) -> String {
        format!(
            "To: {}\nSubject: vmbak run {}: {}/{} succeeded\n\n{}",
            self.recipient,
            summary.run_id,
            summary.succeeded,
            summary.total,
            summary.render_text()
        )
    }
}

impl Notifier for MailNotifier {
    fn notify(&self, summary: &RunSummary) -> Result<()> {
        let message = self.render_message(summary);
        run_with_input("sendmail", &["-t"], &message)?;
        info!(recipient = %self.recipient, "mailed run summary");
        Ok(())
    }
}
