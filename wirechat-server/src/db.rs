//! SQLite-backed chat history.
//!
//! Same contract as the flat-file store: append in arrival order, tail the
//! current day. Uses WAL mode so replay reads don't block appends.

use std::path::Path;

use chrono::{Local, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use rusqlite::{Connection, Result as SqlResult, params};

use crate::error::StoreError;
use crate::history::{HistoryEntry, MessageRecord, MessageStore, RecordKind, TIMESTAMP_FORMAT};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> SqlResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                day         TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                nick        TEXT NOT NULL,
                kind        TEXT NOT NULL,
                payload     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_day ON messages(day, id);
            ",
        )
    }

    pub fn tail_for_day(&self, day: NaiveDate, n: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, nick, kind, payload FROM messages
             WHERE day = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![day_key(day), limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (ts, nick, kind, payload) = row?;
            let parsed = NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT)
                .ok()
                .zip(RecordKind::parse(&kind));
            entries.push(match parsed {
                Some((timestamp, kind)) => HistoryEntry::Record(MessageRecord {
                    timestamp,
                    nick,
                    kind,
                    payload,
                }),
                None => HistoryEntry::Raw(format!("[{ts}] {nick}: {payload}")),
            });
        }
        entries.reverse();
        Ok(entries)
    }
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

impl MessageStore for SqliteStore {
    fn append(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO messages (day, timestamp, nick, kind, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                day_key(record.day()),
                record.timestamp_str(),
                record.nick,
                record.kind.as_str(),
                record.payload,
            ],
        )?;
        Ok(())
    }

    fn tail(&self, n: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        self.tail_for_day(Local::now().date_naive(), n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_returns_latest_in_arrival_order() {
        let store = SqliteStore::open_memory().unwrap();
        store.append(&MessageRecord::now("alice", RecordKind::Text, "one")).unwrap();
        store.append(&MessageRecord::now("bob", RecordKind::Image, "https://x.test/a.png")).unwrap();
        store.append(&MessageRecord::now("alice", RecordKind::Text, "three")).unwrap();

        let tail = store.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        match (&tail[0], &tail[1]) {
            (HistoryEntry::Record(a), HistoryEntry::Record(b)) => {
                assert_eq!(a.kind, RecordKind::Image);
                assert_eq!(a.payload, "https://x.test/a.png");
                assert_eq!(b.payload, "three");
            }
            other => panic!("unexpected entries: {other:?}"),
        }
    }

    #[test]
    fn tail_is_scoped_to_the_day() {
        let store = SqliteStore::open_memory().unwrap();
        let mut old = MessageRecord::now("alice", RecordKind::Text, "yesterday");
        old.timestamp = NaiveDateTime::parse_from_str("2020-01-01T10:00:00", TIMESTAMP_FORMAT).unwrap();
        store.append(&old).unwrap();

        assert!(store.tail(50).unwrap().is_empty());
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(store.tail_for_day(day, 50).unwrap(), vec![HistoryEntry::Record(old)]);
    }

    #[test]
    fn reopening_a_file_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append(&MessageRecord::now("alice", RecordKind::Text, "persisted")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.tail(10).unwrap().len(), 1);
    }
}
