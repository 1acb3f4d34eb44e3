use crate::auth::RedditAuth;
use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use crate::retry::{RetryConfig, RetryExecutor, RetryMetrics, RetryPolicy};
use chrono::{DateTime, TimeZone, Utc};
use replybot_core::{CandidateItem, CoreError, Credentials, ItemId, RedditApiError};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
pub const REDDIT_WEB_BASE: &str = "https://www.reddit.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub dist: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

impl<T> RedditListing<T> {
    pub fn into_items(self) -> impl Iterator<Item = T> {
        self.data.children.into_iter().map(|child| child.data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub body: String,
    pub created_utc: f64,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub link_title: Option<String>,
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub created_utc: f64,
    #[serde(default)]
    pub is_self: bool,
}

/// Body of a `POST /api/comment` response with `api_type=json`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommentResponse {
    pub json: CommentResponseEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentResponseEnvelope {
    /// Triples of `[code, message, field]`.
    #[serde(default)]
    pub errors: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub data: Option<CommentResponseData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentResponseData {
    #[serde(default)]
    pub things: Vec<RedditListingChild<RedditCommentData>>,
}

impl CommentResponse {
    /// Turns Reddit's in-band error list into a `CoreError`.
    pub fn check(&self) -> Result<(), CoreError> {
        let Some(first) = self.json.errors.first() else {
            return Ok(());
        };

        let field = |index: usize| {
            first
                .get(index)
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let code = field(0);
        let message = field(1);

        if code == "RATELIMIT" {
            return Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                retry_after: parse_ratelimit_delay(&message).unwrap_or(60),
            }));
        }

        Err(CoreError::RedditApi(RedditApiError::Rejected { code, message }))
    }

    pub fn posted_comment(&self) -> Option<&RedditCommentData> {
        self.json
            .data
            .as_ref()
            .and_then(|data| data.things.first())
            .map(|thing| &thing.data)
    }
}

/// Reads the wait out of messages like "Take a break for 5 minutes before
/// trying again."
pub fn parse_ratelimit_delay(message: &str) -> Option<u64> {
    let words: Vec<&str> = message.split_whitespace().collect();
    words.windows(2).find_map(|pair| {
        let amount: u64 = pair[0].parse().ok()?;
        let unit = pair[1].to_ascii_lowercase();
        if unit.starts_with("millisecond") {
            Some(amount.div_ceil(1000))
        } else if unit.starts_with("second") {
            Some(amount)
        } else if unit.starts_with("minute") {
            Some(amount * 60)
        } else {
            None
        }
    })
}

fn timestamp(created_utc: f64) -> DateTime<Utc> {
    let secs = created_utc.trunc() as i64;
    let nanos = (created_utc.fract() * 1e9) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_default()
}

fn absolute_permalink(permalink: Option<String>) -> Option<String> {
    permalink.map(|link| {
        if link.starts_with('/') {
            format!("{}{}", REDDIT_WEB_BASE, link)
        } else {
            link
        }
    })
}

impl From<RedditCommentData> for CandidateItem {
    fn from(comment: RedditCommentData) -> Self {
        Self {
            id: ItemId::comment(comment.id),
            author: comment.author,
            body: comment.body,
            created_utc: timestamp(comment.created_utc),
            subreddit: comment.subreddit,
            permalink: absolute_permalink(comment.permalink),
            title: comment.link_title,
        }
    }
}

impl From<RedditPostData> for CandidateItem {
    fn from(post: RedditPostData) -> Self {
        let body = if post.selftext.is_empty() {
            post.title.clone()
        } else {
            format!("{}\n\n{}", post.title, post.selftext)
        };

        Self {
            id: ItemId::submission(post.id),
            author: post.author,
            body,
            created_utc: timestamp(post.created_utc),
            subreddit: post.subreddit,
            permalink: absolute_permalink(post.permalink),
            title: Some(post.title),
        }
    }
}

/// Server-side request budget from the `x-ratelimit-*` headers.
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> (Option<f64>, Option<Duration>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<f64>().ok())
    };

    let remaining = header("x-ratelimit-remaining");
    let reset = header("x-ratelimit-reset").and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    (remaining, reset)
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(60)
}

/// `/r/{name}/...` endpoints name a subreddit, everything else does not.
fn subreddit_of(endpoint: &str) -> Option<&str> {
    endpoint
        .strip_prefix("/r/")
        .and_then(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
}

/// Maps an unsuccessful HTTP status to the matching Reddit error.
pub fn status_error(status: StatusCode, endpoint: &str, headers: &HeaderMap) -> CoreError {
    let error = match status.as_u16() {
        429 => RedditApiError::RateLimitExceeded {
            retry_after: retry_after_secs(headers),
        },
        401 => RedditApiError::InvalidToken,
        403 => RedditApiError::Forbidden {
            resource: endpoint.to_string(),
        },
        // Unknown subreddits either 404 or redirect to the search page.
        404 | 300..=399 => match subreddit_of(endpoint) {
            Some(subreddit) => RedditApiError::SubredditNotFound {
                subreddit: subreddit.to_string(),
            },
            None => RedditApiError::InvalidResponse {
                details: format!("Resource not found: {}", endpoint),
            },
        },
        code if status.is_server_error() => RedditApiError::ServerError { status_code: code },
        code => RedditApiError::InvalidResponse {
            details: format!("Unexpected status {} for {}", code, endpoint),
        },
    };
    CoreError::RedditApi(error)
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    auth: RedditAuth,
    rate_limiter: RateLimiter,
    retry: RetryExecutor,
    base_url: Url,
    user_agent: String,
}

impl RedditApiClient {
    pub fn new(credentials: &Credentials) -> Result<Self, CoreError> {
        let user_agent = credentials.user_agent();

        let http_client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let base_url = Url::parse(REDDIT_API_BASE).map_err(|e| CoreError::Internal {
            message: format!("invalid API base url: {}", e),
        })?;

        Ok(Self {
            http_client,
            auth: RedditAuth::new(credentials)?,
            rate_limiter: RateLimiter::new(RateLimitConfig::reddit_oauth()),
            retry: RetryExecutor::new(RetryConfig::reddit()),
            base_url,
            user_agent,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Exchanges the credentials for a token right away.
    pub async fn authenticate(&self) -> Result<(), CoreError> {
        self.auth.authenticate().await
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        form: Option<&[(&str, &str)]>,
    ) -> Result<Response, CoreError> {
        let url = self.base_url.join(endpoint).map_err(|e| CoreError::InvalidInput {
            message: format!("invalid endpoint {}: {}", endpoint, e),
        })?;
        let start_time = Instant::now();

        let permit = self.rate_limiter.acquire_permit().await?;
        debug!(
            "Acquired rate limit permit for {} {} after {:?}",
            method, endpoint, permit.queue_wait_time
        );

        let access_token = self.auth.access_token().await?;

        let mut request_builder = self
            .http_client
            .request(method.clone(), url)
            .bearer_auth(access_token.expose_secret())
            .query(query_params);

        if let Some(form) = form {
            request_builder = request_builder.form(form);
        }

        debug!("Making Reddit API request: {} {}", method, endpoint);
        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                return Err(if e.is_timeout() {
                    CoreError::RedditApi(RedditApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                });
            }
        };

        let (remaining, reset) = parse_rate_limit_headers(response.headers());
        self.rate_limiter.observe_server_budget(remaining, reset).await;

        let status = response.status();
        self.rate_limiter
            .record_outcome(status == StatusCode::TOO_MANY_REQUESTS)
            .await;

        if !status.is_success() {
            warn!(
                "Request failed with status: {} for {} {}",
                status, method, endpoint
            );
            if status == StatusCode::UNAUTHORIZED {
                self.auth.invalidate().await;
            }
            return Err(status_error(status, endpoint, response.headers()));
        }

        debug!(
            "Request successful: {} {} in {:?}",
            status,
            endpoint,
            start_time.elapsed()
        );
        Ok(response)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        form: Option<&[(&str, &str)]>,
    ) -> Result<T, CoreError> {
        let response = self
            .make_request(method, endpoint, query_params, form)
            .await?;

        response.json::<T>().await.map_err(|e| {
            error!("Failed to parse response from {}: {}", endpoint, e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse response from {}", endpoint),
            })
        })
    }

    async fn get_listing<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<RedditListing<T>, CoreError> {
        self.retry
            .execute(endpoint, move || {
                self.request_json(Method::GET, endpoint, query_params, None)
            })
            .await
    }

    /// Newest comments across a subreddit, newest first as Reddit returns them.
    pub async fn get_new_comments(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<CandidateItem>, CoreError> {
        let endpoint = format!("/r/{}/comments", subreddit);
        let limit = limit.to_string();
        let listing: RedditListing<RedditCommentData> = self
            .get_listing(&endpoint, &[("limit", limit.as_str()), ("raw_json", "1")])
            .await?;

        let items: Vec<CandidateItem> = listing.into_items().map(CandidateItem::from).collect();
        debug!("Retrieved {} comments from r/{}", items.len(), subreddit);
        Ok(items)
    }

    pub async fn get_new_submissions(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<CandidateItem>, CoreError> {
        let endpoint = format!("/r/{}/new", subreddit);
        let limit = limit.to_string();
        let listing: RedditListing<RedditPostData> = self
            .get_listing(&endpoint, &[("limit", limit.as_str()), ("raw_json", "1")])
            .await?;

        let items: Vec<CandidateItem> = listing.into_items().map(CandidateItem::from).collect();
        debug!("Retrieved {} submissions from r/{}", items.len(), subreddit);
        Ok(items)
    }

    pub async fn get_user_comments(
        &self,
        username: &str,
        limit: u32,
    ) -> Result<Vec<RedditCommentData>, CoreError> {
        let endpoint = format!("/user/{}/comments", username);
        let limit = limit.to_string();
        let listing: RedditListing<RedditCommentData> = self
            .get_listing(&endpoint, &[("limit", limit.as_str()), ("raw_json", "1")])
            .await?;

        Ok(listing.into_items().collect())
    }

    /// Posts `text` as a reply to the thing named by `parent_fullname`.
    pub async fn post_comment(
        &self,
        parent_fullname: &str,
        text: &str,
    ) -> Result<Option<RedditCommentData>, CoreError> {
        let form: &[(&str, &str)] = &[
            ("api_type", "json"),
            ("thing_id", parent_fullname),
            ("text", text),
        ];

        let response: CommentResponse = self
            .retry
            .execute_with_policy("/api/comment", RetryPolicy::RefusedOnly, move || async move {
                let response: CommentResponse = self
                    .request_json(Method::POST, "/api/comment", &[], Some(form))
                    .await?;
                response.check()?;
                Ok::<_, CoreError>(response)
            })
            .await?;

        let posted = response.posted_comment().cloned();
        if let Some(comment) = &posted {
            info!("Posted comment t1_{} under {}", comment.id, parent_fullname);
        }
        Ok(posted)
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.get_rate_limit_status().await
    }

    pub fn get_retry_metrics(&self) -> RetryMetrics {
        self.retry.get_metrics()
    }
}
