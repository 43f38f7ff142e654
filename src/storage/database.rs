use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{ChatError, Result};

/// Base database connection wrapper, shared by the message store and auth.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        // Other processes may hold the file (a second window, `tail`).
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ChatError::StoreUnavailable("database lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS credentials (
                user_id TEXT PRIMARY KEY REFERENCES profiles(id) ON DELETE CASCADE,
                salt TEXT NOT NULL,
                password_hash TEXT NOT NULL
            );

            -- Single row: the persisted session of this client
            CREATE TABLE IF NOT EXISTS auth_session (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                started_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS public_messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES profiles(id),
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS private_messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL REFERENCES profiles(id),
                receiver_id TEXT NOT NULL REFERENCES profiles(id),
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_public_messages_created_at
                ON public_messages(created_at);
            CREATE INDEX IF NOT EXISTS idx_private_messages_created_at
                ON private_messages(created_at);
            CREATE INDEX IF NOT EXISTS idx_private_messages_pair
                ON private_messages(sender_id, receiver_id);",
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn seed_profile(db: &Database, username: &str) -> crate::common::User {
    let user = crate::common::User {
        id: uuid::Uuid::new_v4(),
        username: username.to_string(),
    };
    db.connection()
        .unwrap()
        .execute(
            "INSERT INTO profiles (id, username) VALUES (?1, ?2)",
            rusqlite::params![user.id.to_string(), user.username],
        )
        .unwrap();
    user
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.init_schema().unwrap();

        let conn = db.connection().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('profiles', 'credentials', 'auth_session',
                              'public_messages', 'private_messages')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");

        Database::open(&path).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection().unwrap();
        let result = conn.execute(
            "INSERT INTO public_messages (id, user_id, content, created_at)
             VALUES ('m1', 'nobody', 'hi', 0)",
            [],
        );
        assert!(result.is_err());
    }
}
