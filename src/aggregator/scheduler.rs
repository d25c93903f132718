use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::FeedStore;
use crate::error::{AppError, Result};
use crate::feed::{FeedFetcher, ParsedFeedDocument};
use crate::models::Feed;

use super::selector::next_feed_to_fetch;
use super::writer::ingest;

enum ControlMessage {
    Shutdown,
}

/// What a single fetch cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
    NoFeeds,
    Ingested { feed: Feed, created: usize },
}

pub struct Aggregator<S> {
    store: Arc<S>,
    fetcher: FeedFetcher,
}

impl<S: FeedStore + 'static> Aggregator<S> {
    pub fn new(store: Arc<S>, fetcher: FeedFetcher) -> Self {
        Self { store, fetcher }
    }

    /// Fetch the stalest feed and store its new posts.
    ///
    /// The feed is marked as fetched before the request goes out, so a feed
    /// that keeps failing still moves to the back of the queue.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Some(feed) = next_feed_to_fetch(self.store.as_ref()).await? else {
            tracing::info!("No feeds registered, nothing to fetch");
            return Ok(CycleOutcome::NoFeeds);
        };

        self.store.mark_feed_fetched(feed.id).await?;
        tracing::info!("Fetching feed {} ({})", feed.name, feed.url);

        let document = self.fetcher.fetch_feed(&feed.url).await?;
        let created = self.store_document(&feed, &document).await?;

        Ok(CycleOutcome::Ingested { feed, created })
    }

    async fn store_document(&self, feed: &Feed, document: &ParsedFeedDocument) -> Result<usize> {
        let created = ingest(self.store.as_ref(), feed.id, &document.items).await?;
        tracing::debug!(
            "Feed {}: {} of {} items were new",
            feed.name,
            created,
            document.items.len()
        );
        Ok(created)
    }

    /// Run a cycle now and then once per `interval` on a background task
    /// until [`AggregatorHandle::shutdown`] is called.
    pub fn start(self, interval: Duration) -> Result<AggregatorHandle> {
        if interval.is_zero() {
            return Err(AppError::InvalidInterval(
                "interval must be greater than zero".to_string(),
            ));
        }

        let (sender, mut receiver) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            // A cycle that overruns pushes the next one back instead of
            // bunching up missed ticks
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!("Collecting feeds every {:?}", interval);

            loop {
                tokio::select! {
                    biased;
                    msg = receiver.recv() => {
                        match msg {
                            Some(ControlMessage::Shutdown) | None => {
                                tracing::info!("Aggregator stopped");
                                break;
                            }
                        }
                    }
                    _ = timer.tick() => {
                        match self.run_cycle().await {
                            Ok(CycleOutcome::Ingested { feed, created }) => {
                                tracing::info!("Saved {} new posts from {}", created, feed.name);
                            }
                            Ok(CycleOutcome::NoFeeds) => {}
                            Err(err) if err.is_store_error() => {
                                tracing::error!("Fetch cycle aborted: {}", err);
                            }
                            Err(err) => tracing::warn!("Fetch cycle failed: {}", err),
                        }
                    }
                }
            }
        });

        Ok(AggregatorHandle { sender, task })
    }
}

/// A running aggregator. Dropping the handle also stops the loop after the
/// current cycle.
pub struct AggregatorHandle {
    sender: mpsc::Sender<ControlMessage>,
    task: JoinHandle<()>,
}

impl AggregatorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop after the in-flight cycle, if any, and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.sender.send(ControlMessage::Shutdown).await;
        if let Err(err) = self.task.await {
            tracing::error!("Aggregator task failed: {}", err);
        }
    }
}
