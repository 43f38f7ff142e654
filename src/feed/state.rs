use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::common::{ChatMessage, MessageId};

use super::scope::Scope;

/// Messages of one feed, ordered by `created_at` then `id`, unique by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedState {
    pub scope: Scope,
    pub messages: Vec<ChatMessage>,
    pub loading: bool,
    /// Last load failure, shown instead of silently rendering an empty feed.
    pub error: Option<String>,
}

impl FeedState {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            messages: Vec::new(),
            loading: true,
            error: None,
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.iter().any(|message| message.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Inserts `message` at its sorted position. Returns `false` when the id
    /// is already present or the message is outside the scope.
    pub fn merge(&mut self, message: ChatMessage) -> bool {
        if !self.scope.matches(&message) || self.contains(message.id) {
            return false;
        }

        let key = sort_key(&message);
        let position = self
            .messages
            .partition_point(|existing| sort_key(existing) <= key);
        self.messages.insert(position, message);
        true
    }

    /// Merges a loaded batch and marks the load finished.
    pub fn merge_loaded(&mut self, messages: Vec<ChatMessage>) -> bool {
        let mut seen: HashSet<MessageId> = self.messages.iter().map(|m| m.id).collect();
        let before = self.messages.len();

        self.messages.extend(
            messages
                .into_iter()
                .filter(|message| self.scope.matches(message) && seen.insert(message.id)),
        );
        self.messages.sort_by_key(sort_key);

        let changed = self.messages.len() != before || self.loading || self.error.is_some();
        self.loading = false;
        self.error = None;
        changed
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.loading = false;
        self.error = Some(error.into());
    }
}

fn sort_key(message: &ChatMessage) -> (DateTime<Utc>, MessageId) {
    (message.created_at, message.id)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::common::UserId;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn message(sender: UserId, receiver: Option<UserId>, seconds: i64) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            content: format!("t+{seconds}"),
            created_at: at(seconds),
            sender_name: None,
        }
    }

    fn contents(state: &FeedState) -> Vec<&str> {
        state.messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn new_state_is_loading_and_empty() {
        let state = FeedState::new(Scope::Public);
        assert!(state.loading);
        assert!(state.is_empty());
        assert_eq!(state.error, None);
    }

    #[test]
    fn out_of_order_inserts_are_sorted_by_created_at() {
        let alice = Uuid::new_v4();
        let mut state = FeedState::new(Scope::Public);

        assert!(state.merge(message(alice, None, 20)));
        assert!(state.merge(message(alice, None, 10)));
        assert!(state.merge(message(alice, None, 30)));
        assert!(state.merge(message(alice, None, 15)));

        assert_eq!(contents(&state), vec!["t+10", "t+15", "t+20", "t+30"]);
    }

    #[test]
    fn merge_is_idempotent_by_id() {
        let alice = Uuid::new_v4();
        let mut state = FeedState::new(Scope::Public);
        let m = message(alice, None, 1);

        assert!(state.merge(m.clone()));
        assert!(!state.merge(m.clone()));
        assert_eq!(state.messages, vec![m]);
    }

    #[test]
    fn equal_timestamps_are_ordered_by_id() {
        let alice = Uuid::new_v4();
        let mut state = FeedState::new(Scope::Public);
        let mut first = message(alice, None, 5);
        let mut second = message(alice, None, 5);
        first.id = Uuid::from_u128(1);
        second.id = Uuid::from_u128(2);

        state.merge(second.clone());
        state.merge(first.clone());

        assert_eq!(state.messages, vec![first, second]);
    }

    #[test]
    fn merge_rejects_messages_outside_the_scope() {
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut state = FeedState::new(Scope::private(alice, bob));

        assert!(!state.merge(message(alice, Some(carol), 1)));
        assert!(state.merge(message(bob, Some(alice), 2)));
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn merge_loaded_dedupes_and_clears_loading() {
        let alice = Uuid::new_v4();
        let mut state = FeedState::new(Scope::Public);
        let live = message(alice, None, 3);
        state.merge(live.clone());

        let changed = state.merge_loaded(vec![
            message(alice, None, 2),
            live.clone(),
            message(alice, None, 1),
        ]);

        assert!(changed);
        assert!(!state.loading);
        assert_eq!(contents(&state), vec!["t+1", "t+2", "t+3"]);

        // Same batch again changes nothing.
        let again = state.messages.clone();
        assert!(!state.merge_loaded(again));
    }

    #[test]
    fn fail_keeps_messages_and_records_error() {
        let alice = Uuid::new_v4();
        let mut state = FeedState::new(Scope::Public);
        state.merge(message(alice, None, 1));

        state.fail("Store unavailable: boom");

        assert!(!state.loading);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.error.as_deref(), Some("Store unavailable: boom"));

        state.merge_loaded(Vec::new());
        assert_eq!(state.error, None);
    }
}
