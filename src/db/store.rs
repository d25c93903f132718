use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Feed, NewFeed, NewPost, Post};

/// The persistence capabilities the aggregation loop depends on.
///
/// Implementations must enforce uniqueness of feed urls and of
/// `(feed_id, url)` for posts atomically, reporting violations as
/// [`AppError::Duplicate`](crate::error::AppError::Duplicate).
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn create_feed(&self, feed: NewFeed) -> Result<Feed>;

    /// The feed fetched least recently. Never-fetched feeds come first,
    /// ties are broken by ascending id.
    async fn get_next_feed_to_fetch(&self) -> Result<Option<Feed>>;

    async fn mark_feed_fetched(&self, feed_id: i64) -> Result<()>;

    async fn create_post(&self, post: NewPost) -> Result<Post>;
}
