use crate::db::FeedStore;
use crate::error::Result;
use crate::models::Feed;

/// The feed to fetch next, or `None` when no feeds are registered.
///
/// Feeds that were never fetched win over any fetched feed; otherwise the
/// oldest `last_fetched_at` wins, with ties going to the lowest id.
pub async fn next_feed_to_fetch<S: FeedStore + ?Sized>(store: &S) -> Result<Option<Feed>> {
    store.get_next_feed_to_fetch().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::test_support::test_repo;
    use crate::db::Repository;
    use crate::models::NewFeed;

    async fn add_feed(repo: &Repository, user_id: i64, name: &str) -> Feed {
        repo.create_feed(NewFeed {
            name: name.into(),
            url: format!("https://example.com/{name}.xml"),
            user_id,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn empty_store_yields_none() {
        let test = test_repo().await;
        assert!(next_feed_to_fetch(test.repo.as_ref()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn never_fetched_feed_wins_regardless_of_insertion_order() {
        let test = test_repo().await;
        let repo = test.repo.as_ref();
        let user = repo.create_user("alice").await.unwrap();

        let older = add_feed(repo, user.id, "older").await;
        repo.mark_feed_fetched(older.id).await.unwrap();
        let newer = add_feed(repo, user.id, "newer").await;

        let next = next_feed_to_fetch(repo).await.unwrap().unwrap();
        assert_eq!(next.id, newer.id);
        assert_eq!(next.last_fetched_at, None);
    }

    #[tokio::test]
    async fn ties_break_by_ascending_id() {
        let test = test_repo().await;
        let repo = test.repo.as_ref();
        let user = repo.create_user("alice").await.unwrap();

        let first = add_feed(repo, user.id, "first").await;
        add_feed(repo, user.id, "second").await;

        assert_eq!(next_feed_to_fetch(repo).await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn least_recently_fetched_wins() {
        let test = test_repo().await;
        let repo = test.repo.as_ref();
        let user = repo.create_user("alice").await.unwrap();

        let first = add_feed(repo, user.id, "first").await;
        let second = add_feed(repo, user.id, "second").await;

        repo.mark_feed_fetched(second.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        repo.mark_feed_fetched(first.id).await.unwrap();

        assert_eq!(next_feed_to_fetch(repo).await.unwrap().unwrap().id, second.id);
    }
}
