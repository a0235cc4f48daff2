//! Read-only reminder query against the records database.
//!
//! Expected tables (owned and migrated by the records application):
//!
//! ```sql
//! accounts(id INTEGER PRIMARY KEY, active INTEGER NOT NULL)
//! entities(id INTEGER PRIMARY KEY, account_id INTEGER, name TEXT, phone TEXT)
//! activity_records(id INTEGER PRIMARY KEY, entity_id INTEGER, recorded_on TEXT) -- YYYY-MM-DD
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, OpenFlags, params};

use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::ReminderSource;
use nudge_core::types::ReminderCriterion;

const PENDING_QUERY: &str = "
    SELECT e.name, e.phone
    FROM entities e
    JOIN accounts a ON a.id = e.account_id
    WHERE a.active = 1
      AND e.phone IS NOT NULL
      AND TRIM(e.phone) <> ''
      AND NOT EXISTS (
          SELECT 1 FROM activity_records r
          WHERE r.entity_id = e.id
            AND r.recorded_on >= ?1
            AND r.recorded_on < ?2
      )
    ORDER BY e.id
";

/// Opens the database read-only for every query; nothing is cached.
pub struct SqliteReminderSource {
    path: PathBuf,
}

impl SqliteReminderSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn query(path: &Path, start: NaiveDate, end: NaiveDate) -> Result<Vec<ReminderCriterion>> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| NudgeError::store(format!("Records DB open error ({}): {e}", path.display())))?;

        let mut stmt = conn
            .prepare(PENDING_QUERY)
            .map_err(|e| NudgeError::store(format!("Reminder query: {e}")))?;
        let rows = stmt
            .query_map(params![start.to_string(), end.to_string()], |r| {
                Ok(ReminderCriterion {
                    recipient_name: r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    recipient_address: r.get(1)?,
                })
            })
            .map_err(|e| NudgeError::store(format!("Reminder query: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| NudgeError::store(format!("Reminder row: {e}")))
    }
}

#[async_trait]
impl ReminderSource for SqliteReminderSource {
    async fn pending_reminders(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Vec<ReminderCriterion>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::query(&path, period_start, period_end))
            .await
            .map_err(|e| NudgeError::Other(format!("Reminder query task: {e}")))?
    }
}
