use thiserror::Error;

pub type Result<T> = core::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Query or write against the backing store failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Input rejected before reaching the store (e.g. empty message).
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        ChatError::StoreUnavailable(err.to_string())
    }
}

impl ChatError {
    #[cfg(test)]
    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::Validation(_))
    }
}
