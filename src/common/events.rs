use crate::feed::{FeedState, Scope};

use super::types::{Session, User};

/// Sự kiện từ backend gửi lên UI.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    SessionChanged(Option<Session>),
    FeedUpdated(FeedState),
    RosterLoaded(Vec<User>),
    AuthFailed(String),
    /// Tin nhắn không gửi được; UI trả lại nội dung vào ô nhập.
    SendFailed {
        scope: Scope,
        content: String,
        reason: String,
    },
    Failure(String),
}
