//! Feed aggregation: pick the stalest feed, fetch it, store its new posts.

mod scheduler;
mod selector;
mod writer;

pub use scheduler::Aggregator;
