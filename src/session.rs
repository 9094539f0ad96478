// Session store
// Single source of truth for the current access/refresh token pair,
// persisted to a SQLite key-value table across restarts.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::RwLock;

const KEY_ACCESS_TOKEN: &str = "access_token";
const KEY_REFRESH_TOKEN: &str = "refresh_token";

/// Current credential pair. Empty strings mean "absent".
#[derive(Debug, Clone, Default, PartialEq)]
struct Session {
    access_token: String,
    refresh_token: String,
}

/// Credential store with write-through SQLite persistence.
///
/// Mutated only by login, refresh, and logout; every mutation is persisted
/// before it is observable through the accessors.
pub struct SessionStore {
    session: RwLock<Session>,

    /// Kept behind a std Mutex; never held across an await point
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) the session database at `path` and load any
    /// persisted tokens. Absent values load as empty strings.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open session database: {}", path.display()))?;

        Self::from_connection(conn)
    }

    /// Open an ephemeral in-memory session (not persisted across restarts)
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory session database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to initialize session schema")?;

        let session = Session {
            access_token: read_value(&conn, KEY_ACCESS_TOKEN)?,
            refresh_token: read_value(&conn, KEY_REFRESH_TOKEN)?,
        };

        if !session.access_token.is_empty() {
            tracing::debug!("Loaded persisted session");
        }

        Ok(Self {
            session: RwLock::new(session),
            conn: Mutex::new(conn),
        })
    }

    /// True iff an access token is present
    pub async fn is_authenticated(&self) -> bool {
        !self.session.read().await.access_token.is_empty()
    }

    /// Current access token; empty string if not authenticated
    pub async fn access_token(&self) -> String {
        self.session.read().await.access_token.clone()
    }

    /// Current refresh token; empty string if none is held
    pub async fn refresh_token(&self) -> String {
        self.session.read().await.refresh_token.clone()
    }

    /// Overwrite both tokens. Used after login and after a refresh that
    /// rotated the refresh token.
    pub async fn set_credentials(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<(), rusqlite::Error> {
        let mut session = self.session.write().await;
        {
            let conn = self.conn.lock().unwrap();
            write_value(&conn, KEY_ACCESS_TOKEN, access_token)?;
            write_value(&conn, KEY_REFRESH_TOKEN, refresh_token)?;
        }
        session.access_token = access_token.to_string();
        session.refresh_token = refresh_token.to_string();
        Ok(())
    }

    /// Update only the access token. Used after a refresh that did not
    /// rotate the refresh token; the stored refresh token is retained.
    pub async fn set_access_token(&self, access_token: &str) -> Result<(), rusqlite::Error> {
        let mut session = self.session.write().await;
        {
            let conn = self.conn.lock().unwrap();
            write_value(&conn, KEY_ACCESS_TOKEN, access_token)?;
        }
        session.access_token = access_token.to_string();
        Ok(())
    }

    /// Empty both tokens and remove them from storage.
    /// Used on logout and on unrecoverable refresh failure. Idempotent.
    pub async fn clear(&self) -> Result<(), rusqlite::Error> {
        let mut session = self.session.write().await;
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM session_kv", [])?;
        }
        *session = Session::default();
        Ok(())
    }
}

fn read_value(conn: &Connection, key: &str) -> Result<String> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM session_kv WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()
        .with_context(|| format!("Failed to read {} from session storage", key))?;
    Ok(value.unwrap_or_default())
}

fn write_value(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO session_kv (key, value) VALUES (?, ?)",
        [key, value],
    )?;
    Ok(())
}
