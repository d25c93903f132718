use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{Feed, FeedFollow, FeedWithOwner, NewFeed, NewPost, Post, PostWithFeed, User};

use super::schema::SCHEMA;
use super::store::FeedStore;

const FEED_COLUMNS: &str = "id, name, url, user_id, last_fetched_at, created_at, updated_at";
const POST_COLUMNS: &str =
    "id, title, url, description, published_at, feed_id, created_at, updated_at";
const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            // Set busy timeout to 5 seconds to handle concurrent access
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // User operations

    pub async fn create_user(&self, name: &str) -> Result<User> {
        let owned = name.to_string();
        let user = self
            .conn
            .call(move |conn| {
                let inserted = conn.query_row(
                    "INSERT INTO users (name) VALUES (?1) RETURNING id, name, created_at, updated_at",
                    params![owned],
                    user_from_row,
                );
                match inserted {
                    Ok(user) => Ok(Some(user)),
                    Err(err) if is_unique_violation(&err) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            })
            .await?;
        user.ok_or_else(|| AppError::Duplicate(format!("user {name} already exists")))
    }

    pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let name = name.to_string();
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, name, created_at, updated_at FROM users WHERE name = ?1",
                        params![name],
                        user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        let users = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, created_at, updated_at FROM users ORDER BY name")?;
                let users = stmt
                    .query_map([], user_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await?;
        Ok(users)
    }

    /// Deletes every user. Feeds, follows and posts go with them.
    pub async fn delete_users(&self) -> Result<usize> {
        let deleted = self
            .conn
            .call(|conn| {
                let deleted = conn.execute("DELETE FROM users", [])?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    // Feed operations

    pub async fn get_feeds_with_owner(&self) -> Result<Vec<FeedWithOwner>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT f.id, f.name, f.url, f.user_id, f.last_fetched_at, f.created_at,
                              f.updated_at, u.name
                       FROM feeds f
                       JOIN users u ON u.id = f.user_id
                       ORDER BY f.name, f.id"#,
                )?;
                let feeds = stmt
                    .query_map([], |row| {
                        Ok(FeedWithOwner {
                            feed: feed_from_row(row)?,
                            owner_name: row.get(7)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let url = url.to_string();
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?1"),
                        params![url],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    // Follow operations

    pub async fn create_feed_follow(&self, user_id: i64, feed_id: i64) -> Result<FeedFollow> {
        let follow = self
            .conn
            .call(move |conn| {
                let inserted = conn.query_row(
                    "INSERT INTO feed_follows (user_id, feed_id) VALUES (?1, ?2) RETURNING id",
                    params![user_id, feed_id],
                    |row| row.get::<_, i64>(0),
                );
                let id = match inserted {
                    Ok(id) => id,
                    Err(err) if is_unique_violation(&err) => return Ok(None),
                    Err(err) => return Err(err.into()),
                };
                let follow = conn.query_row(
                    r#"SELECT f.name, u.name
                       FROM feed_follows ff
                       JOIN feeds f ON f.id = ff.feed_id
                       JOIN users u ON u.id = ff.user_id
                       WHERE ff.id = ?1"#,
                    params![id],
                    follow_from_row,
                )?;
                Ok(Some(follow))
            })
            .await?;
        follow.ok_or_else(|| AppError::Duplicate("feed is already followed".to_string()))
    }

    pub async fn get_feed_follows_for_user(&self, user_id: i64) -> Result<Vec<FeedFollow>> {
        let follows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT f.name, u.name
                       FROM feed_follows ff
                       JOIN feeds f ON f.id = ff.feed_id
                       JOIN users u ON u.id = ff.user_id
                       WHERE ff.user_id = ?1
                       ORDER BY f.name"#,
                )?;
                let follows = stmt
                    .query_map(params![user_id], follow_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(follows)
            })
            .await?;
        Ok(follows)
    }

    /// Returns whether a follow existed.
    pub async fn delete_feed_follow(&self, user_id: i64, feed_url: &str) -> Result<bool> {
        let feed_url = feed_url.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    r#"DELETE FROM feed_follows
                       WHERE user_id = ?1
                         AND feed_id = (SELECT id FROM feeds WHERE url = ?2)"#,
                    params![user_id, feed_url],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted > 0)
    }

    // Post operations

    /// Newest posts from the feeds a user follows.
    pub async fn get_posts_for_user(&self, user_id: i64, limit: usize) -> Result<Vec<PostWithFeed>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let posts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT p.id, p.title, p.url, p.description, p.published_at, p.feed_id,
                              p.created_at, p.updated_at, f.name
                       FROM posts p
                       JOIN feed_follows ff ON ff.feed_id = p.feed_id
                       JOIN feeds f ON f.id = p.feed_id
                       WHERE ff.user_id = ?1
                       ORDER BY p.published_at DESC, p.id DESC
                       LIMIT ?2"#,
                )?;
                let posts = stmt
                    .query_map(params![user_id, limit], |row| {
                        Ok(PostWithFeed {
                            post: post_from_row(row)?,
                            feed_name: row.get(8)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }
}

#[async_trait]
impl FeedStore for Repository {
    async fn create_feed(&self, feed: NewFeed) -> Result<Feed> {
        let created = self
            .conn
            .call(move |conn| {
                let inserted = conn.query_row(
                    &format!(
                        "INSERT INTO feeds (name, url, user_id) VALUES (?1, ?2, ?3) RETURNING {FEED_COLUMNS}"
                    ),
                    params![feed.name, feed.url, feed.user_id],
                    feed_from_row,
                );
                match inserted {
                    Ok(feed) => Ok(Some(feed)),
                    Err(err) if is_unique_violation(&err) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            })
            .await?;
        created.ok_or_else(|| AppError::Duplicate("feed with this url".to_string()))
    }

    async fn get_next_feed_to_fetch(&self) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(|conn| {
                let feed = conn
                    .query_row(
                        &format!(
                            r#"SELECT {FEED_COLUMNS} FROM feeds
                               ORDER BY last_fetched_at IS NOT NULL, last_fetched_at ASC, id ASC
                               LIMIT 1"#
                        ),
                        [],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    async fn mark_feed_fetched(&self, feed_id: i64) -> Result<()> {
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    &format!(
                        "UPDATE feeds SET last_fetched_at = {NOW}, updated_at = {NOW} WHERE id = ?1"
                    ),
                    params![feed_id],
                )?;
                Ok(updated)
            })
            .await?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("feed {feed_id}")));
        }
        Ok(())
    }

    async fn create_post(&self, post: NewPost) -> Result<Post> {
        let url = post.url.clone();
        let created = self
            .conn
            .call(move |conn| {
                let inserted = conn.query_row(
                    &format!(
                        r#"INSERT INTO posts (title, url, description, published_at, feed_id)
                           VALUES (?1, ?2, ?3, ?4, ?5)
                           RETURNING {POST_COLUMNS}"#
                    ),
                    params![
                        post.title,
                        post.url,
                        post.description,
                        format_datetime(&post.published_at),
                        post.feed_id,
                    ],
                    post_from_row,
                );
                match inserted {
                    Ok(post) => Ok(Some(post)),
                    Err(err) if is_unique_violation(&err) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            })
            .await?;
        created.ok_or_else(|| AppError::Duplicate(format!("post {url}")))
    }
}

#[cfg(test)]
impl Repository {
    pub async fn get_posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>> {
        let posts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {POST_COLUMNS} FROM posts WHERE feed_id = ?1 ORDER BY id"
                ))?;
                let posts = stmt
                    .query_map(params![feed_id], post_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Rows written by hand through the sqlite shell use datetime('now')
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn required_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, String>(idx)
        .ok()
        .and_then(|s| parse_datetime(&s))
        .unwrap_or_else(Utc::now))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: required_datetime(row, 2)?,
        updated_at: required_datetime(row, 3)?,
    })
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        user_id: row.get(3)?,
        last_fetched_at: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| parse_datetime(&s)),
        created_at: required_datetime(row, 5)?,
        updated_at: required_datetime(row, 6)?,
    })
}

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        description: row.get(3)?,
        published_at: required_datetime(row, 4)?,
        feed_id: row.get(5)?,
        created_at: required_datetime(row, 6)?,
        updated_at: required_datetime(row, 7)?,
    })
}

fn follow_from_row(row: &Row) -> rusqlite::Result<FeedFollow> {
    Ok(FeedFollow {
        feed_name: row.get(0)?,
        user_name: row.get(1)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_repo;
    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    fn new_post(feed_id: i64, url: &str) -> NewPost {
        NewPost {
            title: "Hello".into(),
            url: url.into(),
            description: "World".into(),
            published_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            feed_id,
        }
    }

    #[tokio::test]
    async fn duplicate_user_name_is_reported_as_duplicate() {
        let test = test_repo().await;
        let repo = &test.repo;

        assert_ok!(repo.create_user("alice").await);
        let err = repo.create_user("alice").await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)), "got {err:?}");
        assert_eq!(repo.get_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_feed_url_is_reported_as_duplicate() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("alice").await.unwrap();

        let feed = repo
            .create_feed(NewFeed {
                name: "Blog".into(),
                url: "https://example.com/rss".into(),
                user_id: user.id,
            })
            .await
            .unwrap();
        assert_eq!(feed.last_fetched_at, None);

        let err = repo
            .create_feed(NewFeed {
                name: "Blog again".into(),
                url: "https://example.com/rss".into(),
                user_id: user.id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn post_urls_are_unique_per_feed_only() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("alice").await.unwrap();
        let first = repo
            .create_feed(NewFeed {
                name: "One".into(),
                url: "https://one.example/rss".into(),
                user_id: user.id,
            })
            .await
            .unwrap();
        let second = repo
            .create_feed(NewFeed {
                name: "Two".into(),
                url: "https://two.example/rss".into(),
                user_id: user.id,
            })
            .await
            .unwrap();

        let post = repo.create_post(new_post(first.id, "http://x/1")).await.unwrap();
        assert_eq!(post.published_at, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

        let err = repo
            .create_post(new_post(first.id, "http://x/1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)), "got {err:?}");

        assert_ok!(repo.create_post(new_post(second.id, "http://x/1")).await);
    }

    #[tokio::test]
    async fn post_for_missing_feed_is_a_store_error() {
        let test = test_repo().await;
        let err = test
            .repo
            .create_post(new_post(42, "http://x/1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)), "got {err:?}");
        assert!(err.is_store_error());
    }

    #[tokio::test]
    async fn marking_unknown_feed_fails() {
        let test = test_repo().await;
        let err = test.repo.mark_feed_fetched(7).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn follows_and_browse() {
        let test = test_repo().await;
        let repo = &test.repo;
        let alice = repo.create_user("alice").await.unwrap();
        let bob = repo.create_user("bob").await.unwrap();
        let feed = repo
            .create_feed(NewFeed {
                name: "Blog".into(),
                url: "https://example.com/rss".into(),
                user_id: alice.id,
            })
            .await
            .unwrap();

        let follow = repo.create_feed_follow(bob.id, feed.id).await.unwrap();
        assert_eq!(follow.feed_name, "Blog");
        assert_eq!(follow.user_name, "bob");
        assert_err!(repo.create_feed_follow(bob.id, feed.id).await);

        let mut older = new_post(feed.id, "http://x/old");
        older.published_at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        repo.create_post(older).await.unwrap();
        repo.create_post(new_post(feed.id, "http://x/new")).await.unwrap();

        let posts = repo.get_posts_for_user(bob.id, 10).await.unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].post.url, "http://x/new");
        assert_eq!(posts[0].feed_name, "Blog");
        assert!(repo.get_posts_for_user(alice.id, 10).await.unwrap().is_empty());

        assert!(repo.delete_feed_follow(bob.id, &feed.url).await.unwrap());
        assert!(!repo.delete_feed_follow(bob.id, &feed.url).await.unwrap());
        assert!(repo.get_feed_follows_for_user(bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_cascades_to_feeds_and_posts() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("alice").await.unwrap();
        let feed = repo
            .create_feed(NewFeed {
                name: "Blog".into(),
                url: "https://example.com/rss".into(),
                user_id: user.id,
            })
            .await
            .unwrap();
        repo.create_post(new_post(feed.id, "http://x/1")).await.unwrap();

        assert_eq!(repo.delete_users().await.unwrap(), 1);
        assert!(repo.get_feeds_with_owner().await.unwrap().is_empty());
        assert!(repo.get_posts_for_feed(feed.id).await.unwrap().is_empty());
        assert!(repo.get_next_feed_to_fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_datetime_in_row_falls_back_to_now() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("alice").await.unwrap();

        repo.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET created_at = 'not-a-datetime' WHERE id = ?1",
                    params![user.id],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let user = repo.get_user_by_name("alice").await.unwrap().unwrap();
        assert!(user.created_at > Utc::now() - chrono::Duration::minutes(1));
    }
}
