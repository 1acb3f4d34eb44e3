//! Authenticated Reddit API access for the reply bot.

pub mod api;
pub mod auth;
pub mod rate_limiter;
pub mod retry;
pub mod sender;
pub mod source;

pub use api::{RedditApiClient, RedditCommentData, RedditListing, RedditPostData};
pub use auth::{RedditAuth, RedditToken};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use retry::{RetryConfig, RetryExecutor, RetryPolicy};
pub use sender::RedditReplySender;
pub use source::RedditItemSource;
