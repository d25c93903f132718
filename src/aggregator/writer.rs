use chrono::{DateTime, Utc};

use crate::db::FeedStore;
use crate::error::{AppError, Result};
use crate::feed::ParsedItem;
use crate::models::NewPost;

/// Store the items of one feed as posts and return how many were created.
///
/// Items already stored for this feed are skipped, as are items whose
/// publication date cannot be parsed. Any other store failure aborts the
/// remaining items.
pub async fn ingest<S: FeedStore + ?Sized>(
    store: &S,
    feed_id: i64,
    items: &[ParsedItem],
) -> Result<usize> {
    let mut created = 0;

    for item in items {
        let Some(published_at) = parse_pub_date(&item.pub_date) else {
            tracing::warn!(
                "Skipping {}: unparseable pubDate {:?}",
                item.link,
                item.pub_date
            );
            continue;
        };

        let post = NewPost {
            title: item.title.clone(),
            url: item.link.trim().to_string(),
            description: item.description.clone(),
            published_at,
            feed_id,
        };

        match store.create_post(post).await {
            Ok(post) => {
                tracing::info!("Saved post: {}", post.title);
                created += 1;
            }
            Err(AppError::Duplicate(_)) => {
                tracing::info!("Skipping already saved post: {}", item.link);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(created)
}

fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
