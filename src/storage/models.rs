use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{MessageId, UserId};

/// Message tables exposed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    PublicMessages,
    PrivateMessages,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::PublicMessages => "public_messages",
            Table::PrivateMessages => "private_messages",
        }
    }
}

/// Raw inserted row as delivered by the change feed. Carries foreign keys
/// only; display fields have to be fetched with a `select`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub table: Table,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Row handed to `insert`; `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub content: String,
}

/// Row filter for message selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    All,
    Id(MessageId),
    /// Messages exchanged between two users, in either direction.
    Between(UserId, UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileFilter {
    Username(String),
    Except(UserId),
}

/// Sort direction on `created_at` (ties broken by `id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    #[cfg(test)]
    Descending,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            #[cfg(test)]
            SortOrder::Descending => "DESC",
        }
    }
}
