//! Conversation feeds: a scope, its ordered messages, and the live
//! subscription that keeps them current.

mod conversation;
mod scope;
mod state;

pub use conversation::{FeedHandle, open, send};
pub use scope::Scope;
pub use state::FeedState;
