use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type MessageId = Uuid;

/// Hồ sơ người dùng (bảng `profiles`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

impl User {
    /// Chữ cái đầu dùng làm avatar.
    pub fn initial(&self) -> String {
        self.username
            .chars()
            .next()
            .map(|c| c.to_uppercase().collect())
            .unwrap_or_default()
    }
}

/// Domain model đại diện một tin nhắn chat (public hoặc private).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    /// `None` với tin nhắn public.
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Tên hiển thị của người gửi (join từ `profiles`).
    pub sender_name: Option<String>,
}

impl ChatMessage {
    pub fn display_name(&self) -> &str {
        self.sender_name.as_deref().unwrap_or("Unknown")
    }
}

/// Phiên đăng nhập hiện tại.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn user_id(&self) -> UserId {
        self.user.id
    }
}
