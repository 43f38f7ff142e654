use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params, params_from_iter, types::Type};
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use uuid::Uuid;

use crate::common::{ChatMessage, MessageId, User};
use crate::error::{ChatError, Result};

use super::database::Database;
use super::models::{Filter, MessageRow, NewMessage, ProfileFilter, SortOrder, Table};
use super::store::{MessageStore, Subscription};

pub const DEFAULT_BUFFER_SIZE: usize = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const PUBLIC_SELECT: &str = "SELECT m.id, m.user_id, NULL, m.content, m.created_at, p.username
     FROM public_messages m
     LEFT JOIN profiles p ON p.id = m.user_id";

const PRIVATE_SELECT: &str = "SELECT m.id, m.sender_id, m.receiver_id, m.content, m.created_at, p.username
     FROM private_messages m
     LEFT JOIN profiles p ON p.id = m.sender_id";

/// SQLite-backed store with a change feed per table.
///
/// Rows inserted through this store are broadcast right away. Once a table
/// has a subscriber, a watcher task also polls it by `rowid` and broadcasts
/// rows written by other connections to the same file (another window, or
/// `duochat tail`).
pub struct SqliteStore {
    shared: Arc<Shared>,
    next_subscription_id: AtomicU64,
    poll_interval: Duration,
}

struct Shared {
    db: Arc<Database>,
    public: TableFeed,
    private: TableFeed,
    /// Last assigned `created_at` in microseconds; keeps insert order strict.
    last_created_at: Mutex<i64>,
}

struct TableFeed {
    tx: broadcast::Sender<MessageRow>,
    watching: AtomicBool,
    /// Ids inserted here that the watcher has not passed yet; it skips them.
    local_ids: Mutex<HashSet<MessageId>>,
}

impl TableFeed {
    fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
            watching: AtomicBool::new(false),
            local_ids: Mutex::new(HashSet::new()),
        }
    }

    fn local_ids(&self) -> Result<std::sync::MutexGuard<'_, HashSet<MessageId>>> {
        self.local_ids
            .lock()
            .map_err(|_| ChatError::StoreUnavailable("change feed lock poisoned".to_string()))
    }
}

impl SqliteStore {
    #[cfg(test)]
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_capacity(db, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(db: Arc<Database>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                db,
                public: TableFeed::new(capacity),
                private: TableFeed::new(capacity),
                last_created_at: Mutex::new(0),
            }),
            next_subscription_id: AtomicU64::new(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often watched tables are polled for rows from other connections.
    pub fn with_poll_interval(mut self, period: Duration) -> Self {
        self.poll_interval = period.max(Duration::from_millis(1));
        self
    }

    fn db(&self) -> &Database {
        &self.shared.db
    }

    fn next_timestamp(&self) -> Result<DateTime<Utc>> {
        let mut last = self
            .shared
            .last_created_at
            .lock()
            .map_err(|_| ChatError::StoreUnavailable("clock lock poisoned".to_string()))?;
        let micros = Utc::now().timestamp_micros().max(*last + 1);
        *last = micros;
        DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| ChatError::StoreUnavailable("timestamp out of range".to_string()))
    }

    /// Starts the table's watcher unless it already runs. Needs a tokio
    /// runtime; without one only local inserts are delivered.
    fn ensure_watcher(&self, table: Table) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                "No async runtime; {} only sees inserts from this process",
                table.name()
            );
            return;
        };

        let feed = self.shared.feed(table);
        let baseline = {
            // Holding the connection keeps inserts out until `watching` is set.
            let conn = match self.db().connection() {
                Ok(conn) => conn,
                Err(err) => {
                    log::warn!("Cannot watch {}: {err}", table.name());
                    return;
                }
            };
            if feed.watching.load(Ordering::Acquire) {
                return;
            }
            match max_rowid(&conn, table) {
                Ok(rowid) => {
                    feed.watching.store(true, Ordering::Release);
                    rowid
                }
                Err(err) => {
                    log::warn!("Cannot watch {}: {err}", table.name());
                    return;
                }
            }
        };

        log::debug!(
            "Watching {} from rowid {baseline} every {:?}",
            table.name(),
            self.poll_interval
        );
        runtime.spawn(watch_table(
            Arc::downgrade(&self.shared),
            table,
            baseline,
            self.poll_interval,
        ));
    }
}

impl Shared {
    fn feed(&self, table: Table) -> &TableFeed {
        match table {
            Table::PublicMessages => &self.public,
            Table::PrivateMessages => &self.private,
        }
    }

    /// Rows after `last_rowid` that were not inserted by this store.
    fn poll_foreign_rows(&self, table: Table, last_rowid: &mut i64) -> Result<Vec<MessageRow>> {
        let conn = self.db.connection()?;
        let sql = match table {
            Table::PublicMessages => {
                "SELECT rowid, id, user_id, NULL, content, created_at
                 FROM public_messages WHERE rowid > ?1 ORDER BY rowid"
            }
            Table::PrivateMessages => {
                "SELECT rowid, id, sender_id, receiver_id, content, created_at
                 FROM private_messages WHERE rowid > ?1 ORDER BY rowid"
            }
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![*last_rowid], |row| {
                Ok((row.get::<_, i64>(0)?, raw_row_from(table, row)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut local_ids = self.feed(table).local_ids()?;
        let mut foreign = Vec::new();
        for (rowid, row) in rows {
            *last_rowid = rowid;
            if !local_ids.remove(&row.id) {
                foreign.push(row);
            }
        }
        Ok(foreign)
    }
}

async fn watch_table(shared: Weak<Shared>, table: Table, mut last_rowid: i64, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };

        match shared.poll_foreign_rows(table, &mut last_rowid) {
            Ok(rows) => {
                for row in rows {
                    log::debug!("Row {} in {} came from another connection", row.id, table.name());
                    // Err only means nobody is listening right now.
                    let _ = shared.feed(table).tx.send(row);
                }
            }
            Err(err) => log::warn!("Polling {} failed: {err}", table.name()),
        }
    }

    log::debug!("Stopped watching {}", table.name());
}

fn max_rowid(conn: &Connection, table: Table) -> rusqlite::Result<i64> {
    conn.query_row(
        &format!("SELECT COALESCE(MAX(rowid), 0) FROM {}", table.name()),
        [],
        |row| row.get(0),
    )
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn select(
        &self,
        table: Table,
        filter: Filter,
        order: SortOrder,
    ) -> Result<Vec<ChatMessage>> {
        let mut sql = match table {
            Table::PublicMessages => PUBLIC_SELECT.to_string(),
            Table::PrivateMessages => PRIVATE_SELECT.to_string(),
        };
        let mut values: Vec<String> = Vec::new();

        match filter {
            Filter::All => {}
            Filter::Id(id) => {
                sql.push_str(" WHERE m.id = ?1");
                values.push(id.to_string());
            }
            Filter::Between(a, b) => {
                if table != Table::PrivateMessages {
                    return Err(ChatError::Validation(format!(
                        "pair filter is not supported on {}",
                        table.name()
                    )));
                }
                sql.push_str(
                    " WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                        OR (m.sender_id = ?2 AND m.receiver_id = ?1)",
                );
                values.push(a.to_string());
                values.push(b.to_string());
            }
        }

        let direction = order.sql();
        sql.push_str(&format!(
            " ORDER BY m.created_at {direction}, m.id {direction}"
        ));

        let conn = self.db().connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params_from_iter(values.iter()), message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(messages)
    }

    async fn insert(&self, table: Table, row: NewMessage) -> Result<MessageRow> {
        let inserted = MessageRow {
            id: Uuid::new_v4(),
            table,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.content,
            created_at: self.next_timestamp()?,
        };

        let feed = self.shared.feed(table);
        {
            let conn = self.db().connection()?;
            match (table, inserted.receiver_id) {
                (Table::PublicMessages, None) => {
                    conn.execute(
                        "INSERT INTO public_messages (id, user_id, content, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            inserted.id.to_string(),
                            inserted.sender_id.to_string(),
                            inserted.content,
                            inserted.created_at.timestamp_micros()
                        ],
                    )?;
                }
                (Table::PrivateMessages, Some(receiver_id)) => {
                    conn.execute(
                        "INSERT INTO private_messages (id, sender_id, receiver_id, content, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            inserted.id.to_string(),
                            inserted.sender_id.to_string(),
                            receiver_id.to_string(),
                            inserted.content,
                            inserted.created_at.timestamp_micros()
                        ],
                    )?;
                }
                (Table::PublicMessages, Some(_)) => {
                    return Err(ChatError::Validation(
                        "public messages have no receiver".to_string(),
                    ));
                }
                (Table::PrivateMessages, None) => {
                    return Err(ChatError::Validation(
                        "private messages need a receiver".to_string(),
                    ));
                }
            }
            if feed.watching.load(Ordering::Acquire) {
                feed.local_ids()?.insert(inserted.id);
            }
        }

        // Err only means nobody is listening right now.
        let listeners = feed.tx.send(inserted.clone()).unwrap_or(0);
        log::debug!(
            "Inserted {} into {} ({listeners} listeners)",
            inserted.id,
            table.name()
        );

        Ok(inserted)
    }

    fn subscribe_insert(&self, table: Table) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        log::debug!("Opening subscription #{id} on {}", table.name());
        let receiver = self.shared.feed(table).tx.subscribe();
        self.ensure_watcher(table);
        Subscription::new(id, table, receiver)
    }

    async fn select_profiles(&self, filter: ProfileFilter) -> Result<Vec<User>> {
        let (clause, value) = match filter {
            ProfileFilter::Username(username) => (" WHERE username = ?1", username),
            ProfileFilter::Except(id) => (" WHERE id != ?1", id.to_string()),
        };
        let sql = format!("SELECT id, username FROM profiles{clause} ORDER BY username ASC");

        let conn = self.db().connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params![value], |row| {
                Ok(User {
                    id: uuid_column(row, 0)?,
                    username: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(users)
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let receiver_id = match row.get::<_, Option<String>>(2)? {
        Some(value) => Some(parse_uuid(2, &value)?),
        None => None,
    };

    Ok(ChatMessage {
        id: uuid_column(row, 0)?,
        sender_id: uuid_column(row, 1)?,
        receiver_id,
        content: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
        sender_name: row.get(5)?,
    })
}

fn raw_row_from(table: Table, row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let receiver_id = match row.get::<_, Option<String>>(3)? {
        Some(value) => Some(parse_uuid(3, &value)?),
        None => None,
    };

    Ok(MessageRow {
        id: uuid_column(row, 1)?,
        table,
        sender_id: uuid_column(row, 2)?,
        receiver_id,
        content: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
    })
}

pub(crate) fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let value: String = row.get(idx)?;
    parse_uuid(idx, &value)
}

fn parse_uuid(idx: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::seed_profile;
    use crate::storage::store::Delivery;

    fn setup() -> (Arc<Database>, SqliteStore) {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = SqliteStore::new(db.clone());
        (db, store)
    }

    fn public(sender: &User, content: &str) -> NewMessage {
        NewMessage {
            sender_id: sender.id,
            receiver_id: None,
            content: content.to_string(),
        }
    }

    fn private(sender: &User, receiver: &User, content: &str) -> NewMessage {
        NewMessage {
            sender_id: sender.id,
            receiver_id: Some(receiver.id),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn select_returns_rows_in_creation_order_with_names() {
        let (db, store) = setup();
        let alice = seed_profile(&db, "alice");
        let bob = seed_profile(&db, "bob");

        store
            .insert(Table::PublicMessages, public(&alice, "first"))
            .await
            .unwrap();
        store
            .insert(Table::PublicMessages, public(&bob, "second"))
            .await
            .unwrap();

        let messages = store
            .select(Table::PublicMessages, Filter::All, SortOrder::Ascending)
            .await
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[0].display_name(), "alice");
        assert_eq!(messages[1].display_name(), "bob");
        assert!(messages[0].created_at < messages[1].created_at);
        assert_eq!(messages[0].receiver_id, None);

        let newest_first = store
            .select(Table::PublicMessages, Filter::All, SortOrder::Descending)
            .await
            .unwrap();
        assert_eq!(newest_first[0].content, "second");
    }

    #[tokio::test]
    async fn between_filter_matches_both_directions_only() {
        let (db, store) = setup();
        let alice = seed_profile(&db, "alice");
        let bob = seed_profile(&db, "bob");
        let carol = seed_profile(&db, "carol");

        store
            .insert(Table::PrivateMessages, private(&alice, &bob, "hi bob"))
            .await
            .unwrap();
        store
            .insert(Table::PrivateMessages, private(&carol, &alice, "hi alice"))
            .await
            .unwrap();
        store
            .insert(Table::PrivateMessages, private(&bob, &alice, "hi alice, bob here"))
            .await
            .unwrap();

        let messages = store
            .select(
                Table::PrivateMessages,
                Filter::Between(bob.id, alice.id),
                SortOrder::Ascending,
            )
            .await
            .unwrap();

        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi bob", "hi alice, bob here"]);
        assert_eq!(messages[0].receiver_id, Some(bob.id));
    }

    #[tokio::test]
    async fn between_filter_is_rejected_on_public_table() {
        let (_db, store) = setup();
        let err = store
            .select(
                Table::PublicMessages,
                Filter::Between(Uuid::new_v4(), Uuid::new_v4()),
                SortOrder::Ascending,
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn select_by_id_returns_single_row() {
        let (db, store) = setup();
        let alice = seed_profile(&db, "alice");
        let row = store
            .insert(Table::PublicMessages, public(&alice, "only me"))
            .await
            .unwrap();
        store
            .insert(Table::PublicMessages, public(&alice, "noise"))
            .await
            .unwrap();

        let messages = store
            .select(Table::PublicMessages, Filter::Id(row.id), SortOrder::Ascending)
            .await
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, row.id);
        assert_eq!(messages[0].created_at, row.created_at);
    }

    #[tokio::test]
    async fn insert_rejects_mismatched_receiver() {
        let (db, store) = setup();
        let alice = seed_profile(&db, "alice");
        let bob = seed_profile(&db, "bob");

        let err = store
            .insert(Table::PublicMessages, private(&alice, &bob, "oops"))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = store
            .insert(Table::PrivateMessages, public(&alice, "oops"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn insert_with_unknown_sender_is_a_store_error() {
        let (_db, store) = setup();
        let ghost = User {
            id: Uuid::new_v4(),
            username: "ghost".to_string(),
        };
        let err = store
            .insert(Table::PublicMessages, public(&ghost, "boo"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn subscription_is_table_wide_and_per_table() {
        let (db, store) = setup();
        let alice = seed_profile(&db, "alice");
        let bob = seed_profile(&db, "bob");

        let mut public_sub = store.subscribe_insert(Table::PublicMessages);
        let mut private_sub = store.subscribe_insert(Table::PrivateMessages);
        assert_ne!(public_sub.id(), private_sub.id());

        let row = store
            .insert(Table::PrivateMessages, private(&alice, &bob, "psst"))
            .await
            .unwrap();

        assert_eq!(private_sub.recv().await, Some(Delivery::Row(row)));
        assert!(public_sub.receiver_is_empty());
    }

    #[tokio::test]
    async fn closed_subscription_is_unregistered() {
        let (db, store) = setup();
        let alice = seed_profile(&db, "alice");

        let sub = store.subscribe_insert(Table::PublicMessages);
        assert_eq!(store.shared.public.tx.receiver_count(), 1);
        sub.close();
        assert_eq!(store.shared.public.tx.receiver_count(), 0);

        // No listeners left; the insert itself still succeeds.
        store
            .insert(Table::PublicMessages, public(&alice, "anyone?"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_how_much_it_missed() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = SqliteStore::with_capacity(db.clone(), 1);
        let alice = seed_profile(&db, "alice");

        let mut sub = store.subscribe_insert(Table::PublicMessages);
        for n in 0..3 {
            store
                .insert(Table::PublicMessages, public(&alice, &format!("m{n}")))
                .await
                .unwrap();
        }

        assert_eq!(sub.recv().await, Some(Delivery::Lagged(2)));
        match sub.recv().await {
            Some(Delivery::Row(row)) => assert_eq!(row.content, "m2"),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn profiles_are_sorted_and_filterable() {
        let (db, store) = setup();
        let carol = seed_profile(&db, "carol");
        let alice = seed_profile(&db, "alice");
        let bob = seed_profile(&db, "bob");

        let others = store
            .select_profiles(ProfileFilter::Except(bob.id))
            .await
            .unwrap();
        assert_eq!(others, vec![alice.clone(), carol.clone()]);

        let by_name = store
            .select_profiles(ProfileFilter::Username("carol".to_string()))
            .await
            .unwrap();
        assert_eq!(by_name, vec![carol]);

        let nobody = store
            .select_profiles(ProfileFilter::Username("mallory".to_string()))
            .await
            .unwrap();
        assert!(nobody.is_empty());
    }

    #[tokio::test]
    async fn inserts_through_another_connection_reach_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let writer_db = Arc::new(Database::open(&path).unwrap());
        let reader_db = Arc::new(Database::open(&path).unwrap());
        let writer = SqliteStore::new(writer_db.clone());
        let reader = SqliteStore::new(reader_db).with_poll_interval(Duration::from_millis(20));
        let alice = seed_profile(&writer_db, "alice");
        let bob = seed_profile(&writer_db, "bob");

        let mut public_sub = reader.subscribe_insert(Table::PublicMessages);
        let mut private_sub = reader.subscribe_insert(Table::PrivateMessages);

        let shout = writer
            .insert(Table::PublicMessages, public(&alice, "anyone there?"))
            .await
            .unwrap();
        let whisper = writer
            .insert(Table::PrivateMessages, private(&bob, &alice, "just us"))
            .await
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(2), public_sub.recv())
            .await
            .expect("public row from the other connection");
        assert_eq!(delivered, Some(Delivery::Row(shout)));

        let delivered = tokio::time::timeout(Duration::from_secs(2), private_sub.recv())
            .await
            .expect("private row from the other connection");
        assert_eq!(delivered, Some(Delivery::Row(whisper)));
    }

    #[tokio::test]
    async fn watcher_does_not_repeat_local_inserts() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = SqliteStore::new(db.clone()).with_poll_interval(Duration::from_millis(10));
        let alice = seed_profile(&db, "alice");

        let mut sub = store.subscribe_insert(Table::PublicMessages);
        let row = store
            .insert(Table::PublicMessages, public(&alice, "once"))
            .await
            .unwrap();

        assert_eq!(sub.recv().await, Some(Delivery::Row(row)));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(sub.receiver_is_empty());
        assert!(store.shared.public.local_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rows_written_before_subscribing_are_not_replayed() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = SqliteStore::new(db.clone()).with_poll_interval(Duration::from_millis(10));
        let alice = seed_profile(&db, "alice");
        store
            .insert(Table::PublicMessages, public(&alice, "old news"))
            .await
            .unwrap();

        let sub = store.subscribe_insert(Table::PublicMessages);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sub.receiver_is_empty());
    }
}
