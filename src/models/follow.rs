/// A follow as listed to the user: which feed, followed by whom.
#[derive(Debug, Clone)]
pub struct FeedFollow {
    pub feed_name: String,
    pub user_name: String,
}
