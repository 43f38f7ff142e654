use crate::feed::Scope;

/// Lệnh UI gửi xuống backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    SignUp {
        username: String,
        password: String,
    },
    SignIn {
        username: String,
        password: String,
    },
    SignOut,
    /// Mở feed mới cho `scope`; feed cũ (nếu có) bị đóng trước.
    OpenFeed(Scope),
    CloseFeed,
    SendMessage {
        scope: Scope,
        content: String,
    },
    /// Tải danh sách người dùng để chọn chat riêng.
    LoadRoster,
}
