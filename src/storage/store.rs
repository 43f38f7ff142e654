use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::common::{ChatMessage, User};
use crate::error::Result;

use super::models::{Filter, MessageRow, NewMessage, ProfileFilter, SortOrder, Table};

/// Backing store for messages and profiles.
///
/// Subscriptions are table-wide: every inserted row of the table is delivered,
/// whatever conversation it belongs to. Filtering is the caller's job.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Rows of `table` matching `filter`, joined with the sender's username.
    async fn select(&self, table: Table, filter: Filter, order: SortOrder)
    -> Result<Vec<ChatMessage>>;

    async fn insert(&self, table: Table, row: NewMessage) -> Result<MessageRow>;

    fn subscribe_insert(&self, table: Table) -> Subscription;

    /// Profiles matching `filter`, ordered by username.
    async fn select_profiles(&self, filter: ProfileFilter) -> Result<Vec<User>>;
}

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Row(MessageRow),
    /// The receiver fell behind and `n` rows were skipped.
    Lagged(u64),
}

/// Live insert subscription on one table.
///
/// Dropping or closing it unregisters the receiver; nothing is delivered
/// afterwards.
pub struct Subscription {
    id: u64,
    table: Table,
    receiver: broadcast::Receiver<MessageRow>,
}

impl Subscription {
    pub fn new(id: u64, table: Table, receiver: broadcast::Receiver<MessageRow>) -> Self {
        Self {
            id,
            table,
            receiver,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Next delivery, or `None` once the store side is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.receiver.recv().await {
            Ok(row) => Some(Delivery::Row(row)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some(Delivery::Lagged(skipped)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn receiver_is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn close(self) {
        log::debug!(
            "Closing subscription #{} on {}",
            self.id,
            self.table.name()
        );
    }
}
