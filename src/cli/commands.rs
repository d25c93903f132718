use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::aggregator::Aggregator;
use crate::db::FeedStore;
use crate::error::{AppError, Result};
use crate::feed::FeedFetcher;
use crate::models::{NewFeed, User};

use super::middleware::Context;

pub async fn register(ctx: &mut Context, name: &str) -> Result<()> {
    let user = ctx.repo.create_user(name).await?;
    ctx.set_current_user(&user.name)?;

    println!("Created user \"{}\"", user.name);
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

pub async fn login(ctx: &mut Context, name: &str) -> Result<()> {
    if ctx.repo.get_user_by_name(name).await?.is_none() {
        return Err(AppError::NotFound(format!("user {name} does not exist")));
    }

    ctx.set_current_user(name)?;
    println!("User {} has been set", name);
    Ok(())
}

pub async fn users(ctx: &Context) -> Result<()> {
    let current = ctx.config.current_user_name.as_deref();
    for user in ctx.repo.get_users().await? {
        if Some(user.name.as_str()) == current {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }
    Ok(())
}

pub async fn reset(ctx: &Context) -> Result<()> {
    let deleted = ctx.repo.delete_users().await?;
    println!("Reset successful. Deleted {} users.", deleted);
    Ok(())
}

/// Run the aggregator until Ctrl-C.
pub async fn aggregate(ctx: &Context, interval: Duration) -> Result<()> {
    let fetcher = FeedFetcher::new(&ctx.config.fetch)?;
    let handle = Aggregator::new(Arc::clone(&ctx.repo), fetcher).start(interval)?;

    println!("Collecting feeds every {:?}, press Ctrl-C to stop", interval);
    tokio::signal::ctrl_c().await?;

    if handle.is_running() {
        println!("Stopping after the current fetch...");
    }
    handle.shutdown().await;
    Ok(())
}

pub async fn add_feed(ctx: &Context, user: User, name: String, url: String) -> Result<()> {
    let parsed = Url::parse(url.trim())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "unsupported URL scheme {}",
            parsed.scheme()
        )));
    }

    let feed = ctx
        .repo
        .create_feed(NewFeed {
            name,
            url: parsed.to_string(),
            user_id: user.id,
        })
        .await?;
    ctx.repo.create_feed_follow(user.id, feed.id).await?;

    println!("Added feed {} ({}) for {}", feed.name, feed.url, user.name);
    Ok(())
}

pub async fn feeds(ctx: &Context) -> Result<()> {
    for entry in ctx.repo.get_feeds_with_owner().await? {
        let fetched = entry
            .feed
            .last_fetched_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "* {} ({}) added by {}, last fetched {}",
            entry.feed.name, entry.feed.url, entry.owner_name, fetched
        );
    }
    Ok(())
}

pub async fn follow(ctx: &Context, user: User, url: String) -> Result<()> {
    let feed = ctx
        .repo
        .get_feed_by_url(url.trim())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no feed with url {url}")))?;

    let follow = ctx.repo.create_feed_follow(user.id, feed.id).await?;
    println!("{} is now following {}", follow.user_name, follow.feed_name);
    Ok(())
}

pub async fn following(ctx: &Context, user: User) -> Result<()> {
    for follow in ctx.repo.get_feed_follows_for_user(user.id).await? {
        println!("* {}", follow.feed_name);
    }
    Ok(())
}

pub async fn unfollow(ctx: &Context, user: User, url: String) -> Result<()> {
    if !ctx.repo.delete_feed_follow(user.id, url.trim()).await? {
        return Err(AppError::NotFound(format!(
            "{} is not following {}",
            user.name, url
        )));
    }
    println!("{} unfollowed {}", user.name, url);
    Ok(())
}

pub async fn browse(ctx: &Context, user: User, limit: usize) -> Result<()> {
    let posts = ctx.repo.get_posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        println!("No posts yet. Follow a feed and run `gator agg`.");
        return Ok(());
    }

    for entry in posts {
        let post = entry.post;
        let description = html2text::from_read(post.description.as_bytes(), 80)
            .unwrap_or_else(|_| post.description.clone());

        println!("{}", post.title);
        println!(
            "  {} | {}",
            entry.feed_name,
            post.published_at.format("%a, %d %b %Y %H:%M")
        );
        println!("  {}", post.url);
        for line in description.lines() {
            println!("  {}", line);
        }
        println!();
    }
    Ok(())
}
