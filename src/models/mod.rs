mod feed;
mod follow;
mod post;
mod user;

pub use feed::{Feed, FeedWithOwner, NewFeed};
pub use follow::FeedFollow;
pub use post::{NewPost, Post, PostWithFeed};
pub use user::User;
