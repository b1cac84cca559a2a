/*!
 * Database entity models.
 *
 * These structures map directly to the `task_results` table.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted state of one upstream task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRecord {
    /// Upstream task identifier, unique
    pub task_id: String,
    /// Upstream task status (`FINISH`, `RUNNING`, ...)
    pub status: String,
    /// Upstream creation time, recorded on first insert only
    pub create_time: String,
    /// Display name derived from the output path
    pub video_name: String,
    /// Source media URL
    pub source_url: String,
    /// Upstream output path
    pub output_path: String,
    /// Source-language subtitle document URL
    pub source_subtitle_url: String,
    /// Published translated subtitle URL
    pub translated_subtitle_url: String,
    /// Owner of the task
    pub owner: String,
    /// Last modification timestamp (RFC 3339), maintained by the repository
    pub updated_at: String,
}

impl TaskRecord {
    /// Create a record with just a task id
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            ..Default::default()
        }
    }

    // Read a row selected with `TaskRecord::COLUMNS`
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_id: row.get(0)?,
            status: row.get(1)?,
            create_time: row.get(2)?,
            video_name: row.get(3)?,
            source_url: row.get(4)?,
            output_path: row.get(5)?,
            source_subtitle_url: row.get(6)?,
            translated_subtitle_url: row.get(7)?,
            owner: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    /// Column list in `from_row` order
    pub(crate) const COLUMNS: &'static str = "task_id, status, create_time, video_name, source_url, \
        output_path, source_subtitle_url, translated_subtitle_url, owner, updated_at";
}

/// What an upsert did to the stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No row existed
    Inserted,
    /// An existing row changed
    Updated,
    /// The stored row already matched
    Unchanged,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertOutcome::Inserted => write!(f, "inserted"),
            UpsertOutcome::Updated => write!(f, "updated"),
            UpsertOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}
