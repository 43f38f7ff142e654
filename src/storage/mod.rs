pub mod database;
pub mod models;
pub mod sqlite_store;
pub mod store;

pub use database::Database;
pub use models::{Filter, MessageRow, NewMessage, ProfileFilter, SortOrder, Table};
pub use sqlite_store::SqliteStore;
pub use store::{Delivery, MessageStore, Subscription};
