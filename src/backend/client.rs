use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::AuthService;
use crate::common::{ChatCommand, ChatEvent, Session};
use crate::error::{ChatError, Result};
use crate::feed::{self, FeedHandle, FeedState, Scope};
use crate::roster;
use crate::storage::{Delivery, MessageStore};

/// Backend loop: owns the store, auth and the single active feed. Commands
/// come in from the UI, events go back out.
pub struct ChatBackend {
    event_sender: mpsc::Sender<ChatEvent>,
    command_receiver: mpsc::Receiver<ChatCommand>,
    store: Arc<dyn MessageStore>,
    auth: Arc<dyn AuthService>,
    feed: Option<FeedHandle>,
}

impl ChatBackend {
    pub fn new(
        event_sender: mpsc::Sender<ChatEvent>,
        command_receiver: mpsc::Receiver<ChatCommand>,
        store: Arc<dyn MessageStore>,
        auth: Arc<dyn AuthService>,
    ) -> Self {
        Self {
            event_sender,
            command_receiver,
            store,
            auth,
            feed: None,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut session_changes = self.auth.on_session_change();
        let initial = session_changes.borrow_and_update().clone();
        self.emit(ChatEvent::SessionChanged(initial)).await;
        log::info!("Chat backend loop started");

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    if let Some(command) = command {
                        self.handle_command(command).await;
                    } else {
                        break;
                    }
                }
                changed = session_changes.changed() => {
                    if changed.is_err() {
                        log::warn!("Auth service went away; stopping backend");
                        break;
                    }
                    let session = session_changes.borrow_and_update().clone();
                    self.handle_session_change(session).await;
                }
                delivery = next_delivery(&mut self.feed) => {
                    if let Some(delivery) = delivery {
                        self.handle_delivery(delivery).await;
                    }
                }
            }
        }

        self.close_feed();
        log::info!("Chat backend loop stopped");
        Ok(())
    }

    async fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::SignUp { username, password } => {
                if let Err(err) = self.auth.sign_up(&username, &password).await {
                    log::info!("Sign up failed: {err}");
                    self.emit(ChatEvent::AuthFailed(err.to_string())).await;
                }
            }
            ChatCommand::SignIn { username, password } => {
                if let Err(err) = self.auth.sign_in(&username, &password).await {
                    log::info!("Sign in failed: {err}");
                    self.emit(ChatEvent::AuthFailed(err.to_string())).await;
                }
            }
            ChatCommand::SignOut => {
                self.close_feed();
                if let Err(err) = self.auth.sign_out().await {
                    self.report(err).await;
                }
            }
            ChatCommand::OpenFeed(scope) => self.open_feed(scope).await,
            ChatCommand::CloseFeed => self.close_feed(),
            ChatCommand::SendMessage { scope, content } => {
                self.send_message(scope, content).await;
            }
            ChatCommand::LoadRoster => self.load_roster().await,
        }
    }

    async fn handle_session_change(&mut self, session: Option<Session>) {
        if session.is_none() {
            self.close_feed();
        }
        self.emit(ChatEvent::SessionChanged(session)).await;
    }

    async fn handle_delivery(&mut self, delivery: Delivery) {
        let Some(feed) = self.feed.as_mut() else {
            return;
        };

        let (snapshot, failure) = match feed.handle(delivery).await {
            Ok(true) => (Some(feed.snapshot()), None),
            Ok(false) => (None, None),
            // A failed resync leaves the error on the feed state; show it.
            Err(err) => (Some(feed.snapshot()), Some(err)),
        };

        if let Some(snapshot) = snapshot {
            self.emit(ChatEvent::FeedUpdated(snapshot)).await;
        }
        if let Some(err) = failure {
            self.report(err).await;
        }
    }

    async fn open_feed(&mut self, scope: Scope) {
        let session = match self.require_session() {
            Ok(session) => session,
            Err(err) => return self.report(err).await,
        };
        if !scope.includes_user(session.user_id()) {
            let err = ChatError::Validation(format!(
                "{} is not part of {scope}",
                session.user.username
            ));
            return self.report(err).await;
        }

        // The old subscription must be gone before the new one exists.
        self.close_feed();
        self.emit(ChatEvent::FeedUpdated(FeedState::new(scope))).await;

        let feed = feed::open(self.store.clone(), scope).await;
        log::info!(
            "Opened {scope} feed with {} messages",
            feed.state().messages.len()
        );
        self.emit(ChatEvent::FeedUpdated(feed.snapshot())).await;
        self.feed = Some(feed);
    }

    async fn send_message(&mut self, scope: Scope, content: String) {
        if content.trim().is_empty() {
            log::debug!("Ignoring empty message for {scope}");
            return;
        }

        let result = match self.require_session() {
            Ok(session) => match &self.feed {
                Some(feed) if feed.scope() == scope => feed.send(session.user_id(), &content).await,
                _ => feed::send(self.store.as_ref(), session.user_id(), &scope, &content).await,
            },
            Err(err) => Err(err),
        };

        match result {
            Ok(row) => log::debug!("Sent {} to {scope}", row.id),
            Err(err) => {
                log::warn!("Sending to {scope} failed: {err}");
                self.emit(ChatEvent::SendFailed {
                    scope,
                    content,
                    reason: err.to_string(),
                })
                .await;
            }
        }
    }

    async fn load_roster(&mut self) {
        let session = match self.require_session() {
            Ok(session) => session,
            Err(err) => return self.report(err).await,
        };

        match roster::list(self.store.as_ref(), session.user_id()).await {
            Ok(users) => self.emit(ChatEvent::RosterLoaded(users)).await,
            Err(err) => {
                self.emit(ChatEvent::RosterLoaded(Vec::new())).await;
                self.report(err).await;
            }
        }
    }

    fn require_session(&self) -> Result<Session> {
        self.auth.get_session().ok_or(ChatError::AuthRequired)
    }

    fn close_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.close();
        }
    }

    async fn report(&self, err: ChatError) {
        log::warn!("{err}");
        self.emit(ChatEvent::Failure(err.to_string())).await;
    }

    async fn emit(&self, event: ChatEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::warn!("Failed to notify UI: {err}");
        }
    }
}

async fn next_delivery(feed: &mut Option<FeedHandle>) -> Option<Delivery> {
    match feed {
        Some(feed) => feed.next_delivery().await,
        None => std::future::pending().await,
    }
}
