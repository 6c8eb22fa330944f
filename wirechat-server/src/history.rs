//! Chat history: the persisted record format and the append-only stores.
//!
//! Records are one line each:
//!
//! ```text
//! [2026-10-15T09:30:00] alice: hello
//! [2026-10-15T09:30:05] bob: [IMG] https://example.com/cat.png
//! ```
//!
//! The flat-file store partitions by day (`YYYY-MM-DD-messages.txt`) and
//! appends a whole line per write, so a crash never leaves a partial record
//! behind a complete one.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use parking_lot::Mutex;

use crate::error::StoreError;

/// Marker separating image records from text records in persisted lines.
pub const IMAGE_MARKER: &str = "[IMG] ";

/// Second-precision ISO-8601, local time.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Text,
    Image,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// One accepted chat or image event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub timestamp: NaiveDateTime,
    pub nick: String,
    pub kind: RecordKind,
    pub payload: String,
}

impl MessageRecord {
    /// Build a record stamped with the current local time.
    ///
    /// Line breaks in the payload are flattened so the record stays on one
    /// line.
    pub fn now(nick: &str, kind: RecordKind, payload: &str) -> Self {
        let now = Local::now().naive_local();
        Self {
            timestamp: now.with_nanosecond(0).unwrap_or(now),
            nick: nick.to_string(),
            kind,
            payload: payload.replace(['\r', '\n'], " "),
        }
    }

    pub fn timestamp_str(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn day(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// The persisted line, without a trailing newline.
    pub fn to_log_line(&self) -> String {
        let ts = self.timestamp_str();
        match self.kind {
            RecordKind::Text => format!("[{ts}] {}: {}", self.nick, self.payload),
            RecordKind::Image => format!("[{ts}] {}: {IMAGE_MARKER}{}", self.nick, self.payload),
        }
    }

    /// Inverse of [`to_log_line`](Self::to_log_line). The kind is recovered
    /// from the image marker.
    pub fn parse_log_line(line: &str) -> Option<Self> {
        let rest = line.trim_end().strip_prefix('[')?;
        let (ts, rest) = rest.split_once("] ")?;
        let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()?;
        let (nick, body) = rest.split_once(": ")?;
        if nick.is_empty() {
            return None;
        }
        let (kind, payload) = match body.strip_prefix(IMAGE_MARKER) {
            Some(url) => (RecordKind::Image, url),
            None => (RecordKind::Text, body),
        };
        Some(Self {
            timestamp,
            nick: nick.to_string(),
            kind,
            payload: payload.to_string(),
        })
    }

    /// The frame broadcast to clients for this record.
    pub fn frame(&self) -> String {
        let ts = self.timestamp_str();
        match self.kind {
            RecordKind::Text => format!("MSG [{ts}] {}: {}", self.nick, self.payload),
            RecordKind::Image => format!("IMG [{ts}] {} {}", self.nick, self.payload),
        }
    }
}

/// An entry read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    Record(MessageRecord),
    /// A persisted line that does not parse; replayed verbatim.
    Raw(String),
}

impl HistoryEntry {
    pub fn frame(&self) -> String {
        match self {
            Self::Record(record) => record.frame(),
            Self::Raw(line) => format!("MSG {line}"),
        }
    }
}

/// Append-only chat log.
pub trait MessageStore: Send + Sync {
    /// Persist one record after every record previously appended.
    fn append(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// The last `n` records of the current day, oldest first.
    fn tail(&self, n: usize) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// `<dir>/<YYYY-MM-DD>-<kind>.txt`
pub fn day_file(dir: &Path, day: NaiveDate, kind: &str) -> PathBuf {
    dir.join(format!("{}-{kind}.txt", day.format("%Y-%m-%d")))
}

/// Day-partitioned plain-text store.
pub struct FileStore {
    dir: PathBuf,
    // Serialises appends so file order is arrival order.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        day_file(&self.dir, day, "messages")
    }

    pub fn tail_for_day(&self, day: NaiveDate, n: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let content = match std::fs::read_to_string(self.path_for(day)) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..]
            .iter()
            .map(|line| match MessageRecord::parse_log_line(line) {
                Some(record) => HistoryEntry::Record(record),
                None => HistoryEntry::Raw(line.trim().to_string()),
            })
            .collect())
    }
}

impl MessageStore for FileStore {
    fn append(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let mut line = record.to_log_line();
        line.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(record.day()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn tail(&self, n: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        self.tail_for_day(Local::now().date_naive(), n)
    }
}
