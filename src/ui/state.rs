use chrono::{DateTime, Local, TimeZone, Utc};

use crate::common::{ChatCommand, ChatEvent, ChatMessage, Session, User, UserId};
use crate::feed::{FeedState, Scope};

/// Trạng thái phiên đăng nhập nhìn từ UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionView {
    /// Đang chờ backend báo phiên đã lưu.
    Restoring,
    SignedOut,
    SignedIn(Session),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatMode {
    #[default]
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    SignIn,
    SignUp,
}

#[derive(Debug, Clone, Default)]
pub struct AuthForm {
    pub username: String,
    pub password: String,
    pub mode: AuthMode,
    pub error: Option<String>,
    pub busy: bool,
}

/// Trạng thái cục bộ của UI.
pub struct AppState {
    pub session: SessionView,
    pub mode: ChatMode,
    pub selected_peer: Option<User>,
    pub feed: Option<FeedState>,
    pub roster: Vec<User>,
    pub roster_loading: bool,
    pub input_text: String,
    pub auth_form: AuthForm,
    /// Lỗi gần nhất từ backend, hiển thị ở thanh trạng thái.
    pub status: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            session: SessionView::Restoring,
            mode: ChatMode::Public,
            selected_peer: None,
            feed: None,
            roster: Vec::new(),
            roster_loading: false,
            input_text: String::new(),
            auth_form: AuthForm::default(),
            status: None,
        }
    }

    pub fn current_user(&self) -> Option<&User> {
        match &self.session {
            SessionView::SignedIn(session) => Some(&session.user),
            _ => None,
        }
    }

    /// Scope of the conversation on screen; `None` while signed out or when
    /// no peer is picked in private mode.
    pub fn current_scope(&self) -> Option<Scope> {
        let me = self.current_user()?;
        match self.mode {
            ChatMode::Public => Some(Scope::Public),
            ChatMode::Private => self
                .selected_peer
                .as_ref()
                .map(|peer| Scope::private(me.id, peer.id)),
        }
    }

    pub fn is_own(&self, message: &ChatMessage) -> bool {
        self.current_user()
            .is_some_and(|user| user.id == message.sender_id)
    }

    /// Applies a backend event and returns the commands it triggers.
    pub fn apply_event(&mut self, event: ChatEvent) -> Vec<ChatCommand> {
        match event {
            ChatEvent::SessionChanged(Some(session)) => {
                let same_user = self
                    .current_user()
                    .is_some_and(|user| user.id == session.user.id);
                self.session = SessionView::SignedIn(session);
                self.auth_form.password.clear();
                self.auth_form.error = None;
                self.auth_form.busy = false;

                if same_user {
                    Vec::new()
                } else {
                    self.reset_chat();
                    self.open_current_feed()
                }
            }
            ChatEvent::SessionChanged(None) => {
                self.reset_chat();
                self.session = SessionView::SignedOut;
                self.auth_form.busy = false;
                Vec::new()
            }
            ChatEvent::FeedUpdated(state) => {
                if Some(state.scope) == self.current_scope() {
                    self.feed = Some(state);
                } else {
                    log::debug!("Dropping stale update for {} feed", state.scope);
                }
                Vec::new()
            }
            ChatEvent::RosterLoaded(users) => {
                self.roster = users;
                self.roster_loading = false;
                Vec::new()
            }
            ChatEvent::AuthFailed(message) => {
                self.auth_form.error = Some(message);
                self.auth_form.busy = false;
                Vec::new()
            }
            ChatEvent::SendFailed {
                scope,
                content,
                reason,
            } => {
                self.restore_draft(scope, content);
                self.status = Some(reason);
                Vec::new()
            }
            ChatEvent::Failure(message) => {
                self.status = Some(message);
                Vec::new()
            }
        }
    }

    pub fn select_mode(&mut self, mode: ChatMode) -> Vec<ChatCommand> {
        if mode == self.mode || self.current_user().is_none() {
            return Vec::new();
        }
        self.mode = mode;

        match mode {
            ChatMode::Public => {
                self.selected_peer = None;
                self.open_current_feed()
            }
            ChatMode::Private => {
                self.roster_loading = true;
                let mut commands = vec![ChatCommand::LoadRoster];
                commands.extend(self.open_current_feed());
                commands
            }
        }
    }

    pub fn select_peer(&mut self, peer: User) -> Vec<ChatCommand> {
        if self.mode != ChatMode::Private
            || self.selected_peer.as_ref().is_some_and(|p| p.id == peer.id)
        {
            return Vec::new();
        }
        self.selected_peer = Some(peer);
        self.open_current_feed()
    }

    /// Takes the composer text; whitespace-only input sends nothing.
    pub fn submit_message(&mut self) -> Option<ChatCommand> {
        let scope = self.current_scope()?;
        let content = self.input_text.trim();
        if content.is_empty() {
            return None;
        }

        let content = content.to_string();
        self.input_text.clear();
        Some(ChatCommand::SendMessage { scope, content })
    }

    /// Puts an unsent message back into the composer, unless the user has
    /// moved to another conversation or already started typing again.
    pub fn restore_draft(&mut self, scope: Scope, content: String) {
        if self.current_scope() == Some(scope) && self.input_text.trim().is_empty() {
            self.input_text = content;
        } else {
            log::debug!("Dropping unsent draft for {scope}");
        }
    }

    pub fn submit_auth(&mut self) -> Option<ChatCommand> {
        if self.auth_form.busy {
            return None;
        }
        let username = self.auth_form.username.trim().to_string();
        let password = self.auth_form.password.clone();
        if username.is_empty() || password.is_empty() {
            self.auth_form.error = Some("Username and password are required".to_string());
            return None;
        }

        self.auth_form.busy = true;
        self.auth_form.error = None;
        Some(match self.auth_form.mode {
            AuthMode::SignIn => ChatCommand::SignIn { username, password },
            AuthMode::SignUp => ChatCommand::SignUp { username, password },
        })
    }

    pub fn toggle_auth_mode(&mut self) {
        self.auth_form.mode = match self.auth_form.mode {
            AuthMode::SignIn => AuthMode::SignUp,
            AuthMode::SignUp => AuthMode::SignIn,
        };
        self.auth_form.error = None;
    }

    pub fn sign_out(&mut self) -> ChatCommand {
        self.reset_chat();
        ChatCommand::SignOut
    }

    fn open_current_feed(&mut self) -> Vec<ChatCommand> {
        match self.current_scope() {
            Some(scope) => {
                self.feed = Some(FeedState::new(scope));
                vec![ChatCommand::OpenFeed(scope)]
            }
            None => {
                self.feed = None;
                vec![ChatCommand::CloseFeed]
            }
        }
    }

    fn reset_chat(&mut self) {
        self.mode = ChatMode::Public;
        self.selected_peer = None;
        self.feed = None;
        self.roster.clear();
        self.roster_loading = false;
        self.input_text.clear();
        self.status = None;
    }
}

/// "You" for own messages in a private conversation, the author otherwise.
pub fn sender_label<'a>(message: &'a ChatMessage, me: UserId, scope: &Scope) -> &'a str {
    if scope.is_private() && message.sender_id == me {
        "You"
    } else {
        message.display_name()
    }
}

pub fn format_time(timestamp: DateTime<Utc>) -> String {
    format_time_in(timestamp, &Local)
}

pub fn format_time_in<Tz: TimeZone>(timestamp: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    timestamp.with_timezone(tz).format("%I:%M %p").to_string()
}
