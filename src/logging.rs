//! Per-batch log writer.
//!
//! Components send `BatchEvent`s through an `EventSink`; one blocking task renders
//! them to the console and appends them to the batch log file. The task lives for one
//! batch: drop every sender and await the handle to flush.

use crate::model::{BatchEvent, EventSink, LogLevel};
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// How much reaches the console. The log file always gets everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn console_threshold(self) -> LogLevel {
        match self {
            Verbosity::Quiet => LogLevel::Error,
            Verbosity::Normal => LogLevel::Info,
            Verbosity::Verbose => LogLevel::Debug,
        }
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second],[subsecond digits:3]"
    ))
    .unwrap_or_else(|_| "now".into())
}

/// One log file line: `<time> - LEVEL@component: message`.
pub(crate) fn format_file_line(stamp: &str, event: &BatchEvent) -> String {
    format!(
        "{} - {}@{}: {}",
        stamp,
        event.level().as_str(),
        event.component(),
        event.to_message()
    )
}

pub(crate) fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

/// Spawn the writer task for one batch.
pub fn spawn_log_writer(
    log_file: Option<File>,
    verbosity: Verbosity,
) -> (EventSink, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<BatchEvent>();
    let threshold = verbosity.console_threshold();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = LineWriter::new(stdout.lock());
        let mut err = LineWriter::new(stderr.lock());
        let mut file = log_file.map(LineWriter::new);

        while let Some(ev) = rx.blocking_recv() {
            let level = ev.level();
            if let Some(f) = file.as_mut() {
                let _ = writeln!(f, "{}", format_file_line(&timestamp(), &ev));
            }
            if level < threshold {
                continue;
            }
            if level == LogLevel::Error {
                let _ = writeln!(err, "{}", ev.to_message());
            } else {
                let _ = writeln!(out, "{}", ev.to_message());
            }
        }

        let _ = out.flush();
        let _ = err.flush();
        if let Some(mut f) = file {
            let _ = f.flush();
        }
    });
    (tx, handle)
}
