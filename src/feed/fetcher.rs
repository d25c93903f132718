use std::time::Duration;

use reqwest::Client;

use crate::config::FetchConfig;
use crate::error::{AppError, Result};

use super::parser::{parse_feed, ParsedFeedDocument};

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }

    /// Download and validate one RSS feed. Nothing is persisted.
    pub async fn fetch_feed(&self, url: &str) -> Result<ParsedFeedDocument> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::HttpStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let body = response.text().await?;
        let document = parse_feed(&body)?;

        tracing::debug!(
            "Fetched {} valid items from {} ({})",
            document.items.len(),
            url,
            document.title
        );

        Ok(document)
    }
}
