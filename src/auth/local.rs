use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use uuid::Uuid;

use crate::common::{Session, User};
use crate::error::{ChatError, Result};
use crate::storage::Database;
use crate::storage::sqlite_store::{timestamp_column, uuid_column};

use super::AuthService;

const MIN_PASSWORD_LEN: usize = 6;
const MAX_USERNAME_LEN: usize = 32;

/// Username/password auth over the local database. The active session is
/// persisted so it survives restarts.
pub struct LocalAuth {
    db: Arc<Database>,
    session_tx: watch::Sender<Option<Session>>,
}

impl LocalAuth {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let restored = load_persisted_session(&db)?;
        if let Some(session) = &restored {
            log::info!("Restored session for {}", session.user.username);
        }

        Ok(Self {
            db,
            session_tx: watch::channel(restored).0,
        })
    }

    fn start_session(&self, user: User) -> Result<Session> {
        let session = Session {
            user,
            started_at: Utc::now(),
        };

        self.db.connection()?.execute(
            "INSERT OR REPLACE INTO auth_session (id, user_id, started_at)
             VALUES (1, ?1, ?2)",
            params![
                session.user.id.to_string(),
                session.started_at.timestamp_micros()
            ],
        )?;

        log::info!("Signed in as {}", session.user.username);
        self.session_tx.send_replace(Some(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl AuthService for LocalAuth {
    fn get_session(&self) -> Option<Session> {
        self.session_tx.borrow().clone()
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }

    async fn sign_up(&self, username: &str, password: &str) -> Result<Session> {
        let username = validate_username(username)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ChatError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username,
        };
        let salt = Uuid::new_v4().simple().to_string();
        let password_hash = hash_password(&salt, password);

        {
            let mut conn = self.db.connection()?;
            let taken: Option<String> = conn
                .query_row(
                    "SELECT id FROM profiles WHERE username = ?1",
                    params![user.username],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(ChatError::UsernameTaken(user.username));
            }

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO profiles (id, username) VALUES (?1, ?2)",
                params![user.id.to_string(), user.username],
            )?;
            tx.execute(
                "INSERT INTO credentials (user_id, salt, password_hash) VALUES (?1, ?2, ?3)",
                params![user.id.to_string(), salt, password_hash],
            )?;
            tx.commit()?;
        }

        log::info!("Created profile {} ({})", user.username, user.id);
        self.start_session(user)
    }

    async fn sign_in(&self, username: &str, password: &str) -> Result<Session> {
        let username = username.trim();

        let record = self
            .db
            .connection()?
            .query_row(
                "SELECT p.id, p.username, c.salt, c.password_hash
                 FROM profiles p
                 JOIN credentials c ON c.user_id = p.id
                 WHERE p.username = ?1",
                params![username],
                |row| {
                    Ok((
                        User {
                            id: uuid_column(row, 0)?,
                            username: row.get(1)?,
                        },
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((user, salt, expected)) = record else {
            log::debug!("Sign in for unknown user {username}");
            return Err(ChatError::InvalidCredentials);
        };

        if hash_password(&salt, password) != expected {
            log::debug!("Wrong password for {username}");
            return Err(ChatError::InvalidCredentials);
        }

        self.start_session(user)
    }

    async fn sign_out(&self) -> Result<()> {
        self.db
            .connection()?
            .execute("DELETE FROM auth_session WHERE id = 1", [])?;

        if let Some(session) = self.session_tx.send_replace(None) {
            log::info!("Signed out {}", session.user.username);
        }
        Ok(())
    }
}

fn validate_username(username: &str) -> Result<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ChatError::Validation("username is required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ChatError::Validation(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ChatError::Validation(
            "username may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }
    Ok(username.to_string())
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn load_persisted_session(db: &Database) -> Result<Option<Session>> {
    let session = db
        .connection()?
        .query_row(
            "SELECT p.id, p.username, s.started_at
             FROM auth_session s
             JOIN profiles p ON p.id = s.user_id
             WHERE s.id = 1",
            [],
            |row| {
                Ok(Session {
                    user: User {
                        id: uuid_column(row, 0)?,
                        username: row.get(1)?,
                    },
                    started_at: timestamp_column(row, 2)?,
                })
            },
        )
        .optional()?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> LocalAuth {
        LocalAuth::new(Arc::new(Database::in_memory().unwrap())).unwrap()
    }

    #[tokio::test]
    async fn sign_up_starts_a_session_and_notifies_watchers() {
        let auth = auth();
        let mut changes = auth.on_session_change();
        assert!(auth.get_session().is_none());

        let session = auth.sign_up("  alice ", "hunter22").await.unwrap();

        assert_eq!(session.user.username, "alice");
        assert!(changes.has_changed().unwrap());
        let seen = changes.borrow_and_update().clone();
        assert_eq!(seen, Some(session.clone()));
        assert_eq!(auth.get_session(), Some(session));
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let auth = auth();
        auth.sign_up("alice", "hunter22").await.unwrap();

        let err = auth.sign_up("alice", "other-pass").await.unwrap_err();
        assert!(matches!(err, ChatError::UsernameTaken(name) if name == "alice"));
    }

    #[tokio::test]
    async fn sign_up_validates_input() {
        let auth = auth();
        assert!(auth.sign_up("   ", "hunter22").await.unwrap_err().is_validation());
        assert!(auth.sign_up("bob", "123").await.unwrap_err().is_validation());
        assert!(auth.sign_up("bob smith", "hunter22").await.unwrap_err().is_validation());
        assert!(auth.get_session().is_none());
    }

    #[tokio::test]
    async fn sign_in_checks_the_password() {
        let auth = auth();
        let created = auth.sign_up("alice", "hunter22").await.unwrap();
        auth.sign_out().await.unwrap();

        let err = auth.sign_in("alice", "wrong-pass").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidCredentials));
        let err = auth.sign_in("nobody", "hunter22").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidCredentials));
        assert!(auth.get_session().is_none());

        let session = auth.sign_in("alice", "hunter22").await.unwrap();
        assert_eq!(session.user, created.user);
    }

    #[tokio::test]
    async fn sign_out_clears_the_session() {
        let auth = auth();
        auth.sign_up("alice", "hunter22").await.unwrap();
        let mut changes = auth.on_session_change();

        auth.sign_out().await.unwrap();

        assert!(auth.get_session().is_none());
        assert!(changes.has_changed().unwrap());
        assert!(changes.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn session_is_restored_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");

        let user = {
            let auth = LocalAuth::new(Arc::new(Database::open(&path).unwrap())).unwrap();
            auth.sign_up("alice", "hunter22").await.unwrap().user
        };

        let auth = LocalAuth::new(Arc::new(Database::open(&path).unwrap())).unwrap();
        let restored = auth.get_session().expect("session should be restored");
        assert_eq!(restored.user, user);

        auth.sign_out().await.unwrap();
        let auth = LocalAuth::new(Arc::new(Database::open(&path).unwrap())).unwrap();
        assert!(auth.get_session().is_none());
    }

    #[test]
    fn password_hash_depends_on_salt() {
        assert_eq!(hash_password("a", "pw"), hash_password("a", "pw"));
        assert_ne!(hash_password("a", "pw"), hash_password("b", "pw"));
        assert_eq!(hash_password("a", "pw").len(), 64);
    }
}
