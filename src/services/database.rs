use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

/// Local SQLite store for device-only state: preferences and message feedback.
/// Chats and messages live in the hosted database and are never cached here.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Up,
    Down,
}

impl Feedback {
    fn as_str(&self) -> &'static str {
        match self {
            Feedback::Up => "up",
            Feedback::Down => "down",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Feedback::Up),
            "down" => Some(Feedback::Down),
            _ => None,
        }
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| anyhow!("Database connection lock poisoned"))
}

impl Database {
    pub async fn new() -> Result<Self> {
        let path = Self::db_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;

        tracing::debug!("Opened local store at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database (used for testing and as placeholder)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn db_path() -> Result<PathBuf> {
        let data_dir = match std::env::var("XDG_DATA_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = std::env::var("HOME").context("Neither XDG_DATA_HOME nor HOME is set")?;
                PathBuf::from(home).join(".local/share")
            }
        };
        Ok(data_dir.join("parley").join("parley.db"))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = lock(&self.conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE message_feedback (
                    message_id TEXT PRIMARY KEY,
                    rating TEXT NOT NULL
                );

                INSERT INTO schema_version (version) VALUES (1);",
            )
            .context("Failed to apply schema version 1")?;
        }

        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let result: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(result)
        })
        .await?
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    /// Record a rating for a message; `None` clears it.
    pub async fn set_feedback(&self, message_id: &str, feedback: Option<Feedback>) -> Result<()> {
        let conn = self.conn.clone();
        let message_id = message_id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            match feedback {
                Some(f) => conn.execute(
                    "INSERT INTO message_feedback (message_id, rating) VALUES (?1, ?2)
                     ON CONFLICT(message_id) DO UPDATE SET rating = ?2",
                    params![message_id, f.as_str()],
                )?,
                None => conn.execute(
                    "DELETE FROM message_feedback WHERE message_id = ?1",
                    params![message_id],
                )?,
            };
            Ok(())
        })
        .await?
    }

    pub async fn get_feedback(&self, message_id: &str) -> Result<Option<Feedback>> {
        let conn = self.conn.clone();
        let message_id = message_id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let rating: Option<String> = conn
                .query_row(
                    "SELECT rating FROM message_feedback WHERE message_id = ?1",
                    params![message_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(rating.as_deref().and_then(Feedback::parse))
        })
        .await?
    }

    /// Drop every stored rating, used when chat history is cleared.
    pub async fn clear_feedback(&self) -> Result<()> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute("DELETE FROM message_feedback", [])?;
            Ok(())
        })
        .await?
    }
}
