//! Best-effort operational logs, one file per (day, kind).
//!
//! These sit alongside `tracing` output and are meant for operators
//! grepping a day's connections or errors. A failed write is reported
//! through `tracing` and otherwise ignored.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;

use crate::history::day_file;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Connections,
    Errors,
    Server,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connections => "connections",
            Self::Errors => "errors",
            Self::Server => "server",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpLog {
    dir: PathBuf,
}

impl OpLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Append `HH.MM.SS: <event> <detail>` to today's file for `kind`.
    pub fn record(&self, kind: LogKind, event: &str, detail: impl AsRef<str>) {
        let now = Local::now();
        let detail = detail.as_ref();
        let line = if detail.is_empty() {
            format!("{}: {event}\n", now.format("%H.%M.%S"))
        } else {
            format!("{}: {event} {detail}\n", now.format("%H.%M.%S"))
        };

        let path = day_file(&self.dir, now.date_naive(), kind.as_str());
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), "Operational log write failed: {e}");
        }
    }

    pub fn connection(&self, event: &str, detail: impl AsRef<str>) {
        self.record(LogKind::Connections, event, detail);
    }

    pub fn error(&self, event: &str, detail: impl AsRef<str>) {
        self.record(LogKind::Errors, event, detail);
    }

    pub fn server(&self, event: &str) {
        self.record(LogKind::Server, event, "");
    }
}
