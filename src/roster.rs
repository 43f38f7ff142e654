use crate::common::{User, UserId};
use crate::error::Result;
use crate::storage::{MessageStore, ProfileFilter};

/// Candidate peers for a private chat: everyone except `exclude`, by username.
pub async fn list(store: &dyn MessageStore, exclude: UserId) -> Result<Vec<User>> {
    let mut users = store
        .select_profiles(ProfileFilter::Except(exclude))
        .await?;
    users.sort_by(|a, b| a.username.cmp(&b.username));
    Ok(users)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::database::seed_profile;
    use crate::storage::{Database, SqliteStore};

    #[tokio::test]
    async fn roster_excludes_the_caller_and_is_sorted() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = SqliteStore::new(db.clone());
        let zoe = seed_profile(&db, "zoe");
        let me = seed_profile(&db, "mallory");
        let adam = seed_profile(&db, "adam");

        let users = list(&store, me.id).await.unwrap();

        assert_eq!(users, vec![adam, zoe]);
    }

    #[tokio::test]
    async fn roster_is_empty_when_alone() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = SqliteStore::new(db.clone());
        let me = seed_profile(&db, "solo");

        assert!(list(&store, me.id).await.unwrap().is_empty());
    }
}
