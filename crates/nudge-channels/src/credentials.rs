//! SQLite-backed credential store.
//!
//! A single key/value table holds the session blob under `creds` and every
//! rotating key under `key:<id>`. Only the connection manager writes here,
//! so last-write-wins is all the consistency the store needs.

use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::CredentialStore;
use nudge_core::types::Credentials;

const CREDS_KEY: &str = "creds";
const KEY_PREFIX: &str = "key:";

/// Durable credential store.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

/// On-disk shape of the `creds` row.
#[derive(serde::Serialize, serde::Deserialize)]
struct StoredBlob {
    blob: serde_json::Value,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl SqliteCredentialStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| NudgeError::store(format!("Credential DB open error: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    /// Non-durable store, for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NudgeError::store(format!("Credential DB open error: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS auth_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT (datetime('now'))
            );
            ",
        )
        .map_err(|e| NudgeError::store(format!("Migration error: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| NudgeError::store(format!("Lock: {e}")))
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn load(&self) -> Result<Option<Credentials>> {
        let conn = self.lock()?;

        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM auth_state WHERE key = ?1",
                params![CREDS_KEY],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| NudgeError::store(format!("Load creds: {e}")))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let stored: StoredBlob = serde_json::from_str(&raw)?;

        let mut stmt = conn
            .prepare("SELECT key, value FROM auth_state WHERE key LIKE 'key:%'")
            .map_err(|e| NudgeError::store(format!("Load keys: {e}")))?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(|e| NudgeError::store(format!("Load keys: {e}")))?;

        let mut credentials = Credentials::new(stored.blob);
        credentials.updated_at = stored.updated_at;
        for row in rows {
            let (key, value) = row.map_err(|e| NudgeError::store(format!("Load keys: {e}")))?;
            let id = key.trim_start_matches(KEY_PREFIX).to_string();
            credentials.keys.insert(id, serde_json::from_str(&value)?);
        }
        Ok(Some(credentials))
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        let blob = serde_json::to_string(&StoredBlob {
            blob: credentials.blob.clone(),
            updated_at: credentials.updated_at,
        })?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| NudgeError::store(format!("Begin: {e}")))?;
        // Keys rotate: drop the old set so stale ones never resurface.
        tx.execute("DELETE FROM auth_state WHERE key LIKE 'key:%'", [])
            .map_err(|e| NudgeError::store(format!("Save keys: {e}")))?;
        tx.execute(
            "INSERT OR REPLACE INTO auth_state (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![CREDS_KEY, blob],
        )
        .map_err(|e| NudgeError::store(format!("Save creds: {e}")))?;
        for (id, value) in &credentials.keys {
            tx.execute(
                "INSERT OR REPLACE INTO auth_state (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
                params![format!("{KEY_PREFIX}{id}"), serde_json::to_string(value)?],
            )
            .map_err(|e| NudgeError::store(format!("Save keys: {e}")))?;
        }
        tx.commit()
            .map_err(|e| NudgeError::store(format!("Commit: {e}")))?;

        tracing::debug!("💾 Credentials saved ({} rotating keys)", credentials.keys.len());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM auth_state", [])
            .map_err(|e| NudgeError::store(format!("Clear: {e}")))?;
        tracing::info!("🗑️ Stored credentials cleared");
        Ok(())
    }
}
