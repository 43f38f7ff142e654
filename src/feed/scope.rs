use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{ChatMessage, UserId};
use crate::storage::{Filter, MessageRow, Table};

/// Which messages belong to a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Every message of the public channel.
    Public,
    /// Messages between two users, either direction. Stored with
    /// `low <= high` so the pair is unordered; build it with [`Scope::private`].
    Private { low: UserId, high: UserId },
}

impl Scope {
    pub fn private(a: UserId, b: UserId) -> Self {
        if a <= b {
            Scope::Private { low: a, high: b }
        } else {
            Scope::Private { low: b, high: a }
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Scope::Private { .. })
    }

    pub fn table(&self) -> Table {
        match self {
            Scope::Public => Table::PublicMessages,
            Scope::Private { .. } => Table::PrivateMessages,
        }
    }

    pub fn filter(&self) -> Filter {
        match *self {
            Scope::Public => Filter::All,
            Scope::Private { low, high } => Filter::Between(low, high),
        }
    }

    pub fn includes_user(&self, user: UserId) -> bool {
        match *self {
            Scope::Public => true,
            Scope::Private { low, high } => user == low || user == high,
        }
    }

    /// The other participant of a private scope, seen from `me`.
    pub fn counterpart(&self, me: UserId) -> Option<UserId> {
        match *self {
            Scope::Public => None,
            Scope::Private { low, high } if me == low => Some(high),
            Scope::Private { low, high } if me == high => Some(low),
            Scope::Private { .. } => None,
        }
    }

    pub fn includes_pair(&self, sender_id: UserId, receiver_id: Option<UserId>) -> bool {
        match self {
            Scope::Public => true,
            Scope::Private { .. } => {
                receiver_id.is_some_and(|receiver| Scope::private(sender_id, receiver) == *self)
            }
        }
    }

    pub fn matches(&self, message: &ChatMessage) -> bool {
        self.includes_pair(message.sender_id, message.receiver_id)
    }

    /// Change-feed rows come from a whole table; this is the local re-check.
    pub fn matches_row(&self, row: &MessageRow) -> bool {
        row.table == self.table() && self.includes_pair(row.sender_id, row.receiver_id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Public => write!(f, "public"),
            Scope::Private { low, high } => write!(f, "private({low}, {high})"),
        }
    }
}
