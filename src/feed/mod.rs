mod fetcher;
mod parser;

pub use fetcher::FeedFetcher;
pub use parser::{ParsedFeedDocument, ParsedItem};
