use std::sync::Arc;

use crate::common::{ChatMessage, UserId};
use crate::error::{ChatError, Result};
use crate::storage::{
    Delivery, Filter, MessageRow, MessageStore, NewMessage, SortOrder, Subscription,
};

use super::scope::Scope;
use super::state::FeedState;

/// Every message matching `scope`, oldest first.
pub async fn load(store: &dyn MessageStore, scope: &Scope) -> Result<Vec<ChatMessage>> {
    store
        .select(scope.table(), scope.filter(), SortOrder::Ascending)
        .await
}

/// Inserts `content` as `sender` into `scope`.
///
/// Nothing is appended locally; the row comes back through the feed's
/// subscription.
pub async fn send(
    store: &dyn MessageStore,
    sender: UserId,
    scope: &Scope,
    content: &str,
) -> Result<MessageRow> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ChatError::Validation("message is empty".to_string()));
    }

    let receiver_id = match scope {
        Scope::Public => None,
        Scope::Private { .. } => Some(scope.counterpart(sender).ok_or_else(|| {
            ChatError::Validation("sender is not part of this conversation".to_string())
        })?),
    };

    store
        .insert(
            scope.table(),
            NewMessage {
                sender_id: sender,
                receiver_id,
                content: content.to_string(),
            },
        )
        .await
}

/// Subscribes to `scope`'s table, then loads its history.
///
/// Subscribing first means rows inserted while the load runs are merged
/// instead of lost. A failed load leaves the feed empty with `error` set.
pub async fn open(store: Arc<dyn MessageStore>, scope: Scope) -> FeedHandle {
    let subscription = store.subscribe_insert(scope.table());
    log::debug!(
        "Opening {scope} feed on subscription #{} ({})",
        subscription.id(),
        subscription.table().name()
    );

    let mut feed = FeedHandle {
        store,
        state: FeedState::new(scope),
        subscription: Some(subscription),
    };
    if let Err(err) = feed.reload().await {
        log::warn!("Initial load of {scope} feed failed: {err}");
    }
    feed
}

/// Live feed for one scope. Owns the subscription; close it (or drop it)
/// before opening a feed for another scope.
pub struct FeedHandle {
    store: Arc<dyn MessageStore>,
    state: FeedState,
    subscription: Option<Subscription>,
}

impl FeedHandle {
    pub fn scope(&self) -> Scope {
        self.state.scope
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn snapshot(&self) -> FeedState {
        self.state.clone()
    }

    /// Waits for the next change-feed delivery. Cancel-safe; pends forever
    /// once the store side is gone.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        let Some(subscription) = self.subscription.as_mut() else {
            return std::future::pending().await;
        };

        let delivery = subscription.recv().await;
        if delivery.is_none() {
            log::warn!("Change feed for {} closed by the store", self.state.scope);
            self.subscription = None;
        }
        delivery
    }

    /// Applies one delivery. Returns whether the state changed.
    pub async fn handle(&mut self, delivery: Delivery) -> Result<bool> {
        match delivery {
            Delivery::Row(row) => self.on_insert(row).await,
            Delivery::Lagged(skipped) => {
                log::warn!(
                    "{} feed missed {skipped} rows; reloading",
                    self.state.scope
                );
                self.reload().await
            }
        }
    }

    /// Handles one raw inserted row from the table-wide subscription.
    pub async fn on_insert(&mut self, row: MessageRow) -> Result<bool> {
        if !self.state.scope.matches_row(&row) {
            log::trace!("Ignoring {} outside {}", row.id, self.state.scope);
            return Ok(false);
        }
        if self.state.contains(row.id) {
            return Ok(false);
        }

        // The raw row has no display fields; fetch the joined version.
        let fetched = self
            .store
            .select(row.table, Filter::Id(row.id), SortOrder::Ascending)
            .await?;
        let Some(message) = fetched.into_iter().next() else {
            log::debug!("Row {} not found on re-fetch", row.id);
            return Ok(false);
        };

        Ok(self.state.merge(message))
    }

    /// Loads the scope again and merges the result.
    pub async fn reload(&mut self) -> Result<bool> {
        match load(self.store.as_ref(), &self.state.scope).await {
            Ok(messages) => Ok(self.state.merge_loaded(messages)),
            Err(err) => {
                self.state.fail(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn send(&self, sender: UserId, content: &str) -> Result<MessageRow> {
        send(self.store.as_ref(), sender, &self.state.scope, content).await
    }

    pub fn close(self) {
        log::debug!("Closing {} feed", self.state.scope);
        if let Some(subscription) = self.subscription {
            subscription.close();
        }
    }
}
