use std::{path::Path, sync::Mutex};

use indoc::indoc;
use miette::{Context, IntoDiagnostic, Result};
use rusqlite::{params, Connection};
use time::OffsetDateTime;
use tracing::debug;

use super::{HistoryLog, HistoryRecord, NewHistoryEntry};
use crate::utils::MutexUtils;

#[derive(Debug)]
pub struct Sqlite {
    conn: Mutex<Connection>,
}

impl Sqlite {
    /// Read the database file at the given path or create it if it does not exist.
    ///
    /// A file that is not a valid database is an error.
    pub fn read_or_create(p: &Path) -> Result<Self> {
        let conn = Connection::open(p)
            .into_diagnostic()
            .wrap_err("Could not open sqlite file")?;
        Self::with_connection(conn)
    }

    /// A database living only as long as the returned value
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().into_diagnostic()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables().wrap_err("Could not create tables")?;
        Ok(db)
    }

    /// Create the tables if they do not already exist
    fn create_tables(&self) -> Result<()> {
        self.conn.with_lock(|conn| {
            conn.execute_batch(indoc! {"
                BEGIN;
                CREATE TABLE IF NOT EXISTS downloads (
                    id          INTEGER PRIMARY KEY,
                    url         TEXT NOT NULL,
                    video_id    TEXT NOT NULL,
                    title       TEXT NOT NULL,
                    author      TEXT NOT NULL,
                    format_id   TEXT,
                    timestamp   INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS downloads_timestamp
                    ON downloads (timestamp);
                COMMIT;
            "})
            .into_diagnostic()
        })
    }
}

impl HistoryLog for Sqlite {
    fn append(&self, entry: &NewHistoryEntry) -> Result<i64> {
        let timestamp = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;

        let id = self.conn.with_lock(|conn| {
            conn.query_row(
                indoc! {"
                    INSERT INTO downloads (url, video_id, title, author, format_id, timestamp)
                    VALUES (?, ?, ?, ?, ?, ?)
                    RETURNING id
                "},
                params![
                    entry.url,
                    entry.video_id,
                    entry.title,
                    entry.author,
                    entry.format_id,
                    timestamp
                ],
                |row| row.get(0),
            )
            .into_diagnostic()
            .wrap_err("Could not insert new download row")
        })?;

        debug!("Recorded download {id} of video {}", entry.video_id);
        Ok(id)
    }

    fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.conn.with_lock(|conn| {
            let mut stmt = conn
                .prepare(indoc! {"
                    SELECT id, url, video_id, title, author, format_id, timestamp
                    FROM downloads
                    ORDER BY timestamp DESC, id DESC
                    LIMIT ?
                "})
                .into_diagnostic()?;

            let records = stmt
                .query_map([limit], |row| {
                    Ok(HistoryRecord {
                        id: row.get::<_, i64>(0)?.to_string(),
                        url: row.get(1)?,
                        video_id: row.get(2)?,
                        title: row.get(3)?,
                        author: row.get(4)?,
                        format_id: row.get(5)?,
                        timestamp: row.get(6)?,
                    })
                })
                .into_diagnostic()
                .wrap_err("Could not query download rows")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .into_diagnostic()?;
            Ok(records)
        })
    }
}
