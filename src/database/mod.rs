mod sqlite;

use miette::Result;
use serde::Serialize;

pub use sqlite::Sqlite;

/// Number of entries returned when reading the history
pub const HISTORY_LIMIT: usize = 10;

/// A download about to be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub url: String,
    pub video_id: String,
    pub title: String,
    pub author: String,
    pub format_id: Option<String>,
}

/// A recorded download, as exposed by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Server-assigned identifier
    pub id: String,
    pub url: String,
    pub video_id: String,
    pub title: String,
    pub author: String,
    pub format_id: Option<String>,
    /// Time of the download, in milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Append-only log of the downloads served.
///
/// Writes must never fail a download: callers log the errors and go on.
pub trait HistoryLog: Send + Sync {
    /// Record a download and return its identifier
    fn append(&self, entry: &NewHistoryEntry) -> Result<i64>;

    /// The `limit` most recent entries, newest first
    fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>>;
}
