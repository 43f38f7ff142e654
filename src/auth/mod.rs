//! Authentication collaborator: who is signed in, and notifications when
//! that changes.

mod local;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::common::Session;
use crate::error::Result;

pub use local::LocalAuth;

#[async_trait]
pub trait AuthService: Send + Sync {
    fn get_session(&self) -> Option<Session>;

    /// Receiver that observes every session change (sign in, sign out).
    fn on_session_change(&self) -> watch::Receiver<Option<Session>>;

    /// Creates the profile and signs it in.
    async fn sign_up(&self, username: &str, password: &str) -> Result<Session>;

    async fn sign_in(&self, username: &str, password: &str) -> Result<Session>;

    async fn sign_out(&self) -> Result<()>;
}
