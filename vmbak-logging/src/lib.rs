//! Tracing subscriber initialization.
//!
//! Configured through environment variables so cron invocations can be
//! redirected without touching the command line:
//!
//! - `VMBAK_LOG_LEVEL`: filter directive, default `info`
//! - `VMBAK_LOG_OUTPUT`: `console`, `file` or `both`, default `console`
//! - `VMBAK_LOG_FORMAT`: `human` or `json`, default `human`
//! - `VMBAK_LOG_FILE`: file path when output includes `file`
//!
//! This is the diagnostic stream only; the per-run `log.txt` written
//! into each backup set is accumulated separately by `BackupRun`.

use std::{
    env,
    io::{self, Write},
    path::Path,
};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

/// Writer that duplicates every line to two sinks.
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

/// Initializes the global tracing subscriber from the environment.
///
/// The returned guard must be held for the life of the process when a
/// file appender is in use, or buffered lines are lost on exit.
pub fn init_subscriber() -> Option<WorkerGuard> {
    let log_level = env::var("VMBAK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_output = env::var("VMBAK_LOG_OUTPUT").unwrap_or_else(|_| "console".to_string());
    let log_format = env::var("VMBAK_LOG_FORMAT").unwrap_or_else(|_| "human".to_string());
    let log_file_path =
        env::var("VMBAK_LOG_FILE").unwrap_or_else(|_| "/var/log/vmbak/vmbak.log".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let use_console = log_output == "console" || log_output == "both";
    let use_file = log_output == "file" || log_output == "both";
    let is_json = log_format == "json";

    let subscriber = registry().with(env_filter);
    let mut guard: Option<WorkerGuard> = None;

    // Opening the log file can fail (unwritable /var/log for a cron
    // user, missing parent); a broken appender must not take the
    // process down, so fall back to console when it cannot be built.
    let file_writer: Option<NonBlocking> = if use_file {
        match open_file_appender(&log_file_path) {
            Ok(appender) => {
                let (non_blocking, worker_guard) = tracing_appender::non_blocking(appender);
                guard = Some(worker_guard);
                Some(non_blocking)
            }
            Err(err) => {
                eprintln!("vmbak: cannot open log file {log_file_path}: {err}; logging to console");
                None
            }
        }
    } else {
        None
    };

    match file_writer {
        Some(non_blocking) if use_console => {
            let tee = MakeTee {
                make_a: io::stderr,
                make_b: non_blocking,
            };
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(tee);
            if is_json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
        }
        Some(non_blocking) => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if is_json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
        }
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
            if is_json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
        }
    }

    guard
}

fn open_file_appender(
    log_file_path: &str,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    let log_path = Path::new(log_file_path);
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("/tmp"));
    let log_filename = log_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vmbak.log".to_string());

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(log_filename)
        .build(log_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appender_opens_in_a_writable_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vmbak.log");
        assert!(open_file_appender(&path.to_string_lossy()).is_ok());
    }

    #[test]
    fn unwritable_log_path_is_an_error_not_a_panic() {
        // A parent component that is a regular file cannot be created
        // as a directory.
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().join("logs").join("vmbak.log");
        assert!(open_file_appender(&path.to_string_lossy()).is_err());
    }
}
