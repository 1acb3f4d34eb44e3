//! Script-app authentication against Reddit's OAuth2 token endpoint.
//!
//! Bots authenticate with the resource-owner password grant: the app's
//! client id and secret go in the Basic auth header, the bot account's
//! username and password in the form body.

use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use oauth2::{
    AuthType, AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, RequestTokenError,
    ResourceOwnerPassword, ResourceOwnerUsername, TokenResponse, TokenUrl,
};
use replybot_core::{CoreError, Credentials, RedditApiError, SecretString};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const REDDIT_AUTHORIZE_URL: &str = "https://www.reddit.com/api/v1/authorize";
pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Tokens are renewed this long before Reddit would expire them.
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RedditToken {
    pub access_token: SecretString,
    pub expires_at: Instant,
    pub scope: Option<String>,
}

impl RedditToken {
    pub fn from_lifetime(access_token: SecretString, expires_in: Duration) -> Self {
        Self {
            access_token,
            expires_at: Instant::now() + expires_in,
            scope: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn needs_refresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN >= self.expires_at
    }
}

#[derive(Debug)]
pub struct RedditAuth {
    oauth_client: BasicClient,
    http_client: reqwest::Client,
    username: ResourceOwnerUsername,
    password: ResourceOwnerPassword,
    token: Mutex<Option<RedditToken>>,
}

impl RedditAuth {
    pub fn new(credentials: &Credentials) -> Result<Self, CoreError> {
        let auth_url = AuthUrl::new(REDDIT_AUTHORIZE_URL.to_string()).map_err(invalid_url)?;
        let token_url = TokenUrl::new(REDDIT_TOKEN_URL.to_string()).map_err(invalid_url)?;

        let oauth_client = BasicClient::new(
            ClientId::new(credentials.client_id.clone()),
            Some(ClientSecret::new(
                credentials.client_secret.expose_secret().to_string(),
            )),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::BasicAuth);

        let http_client = reqwest::Client::builder()
            .user_agent(credentials.user_agent())
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            oauth_client,
            http_client,
            username: ResourceOwnerUsername::new(credentials.username.clone()),
            password: ResourceOwnerPassword::new(
                credentials.password.expose_secret().to_string(),
            ),
            token: Mutex::new(None),
        })
    }

    /// Returns a bearer token, fetching a fresh one when none is cached or the
    /// cached one is about to expire.
    pub async fn access_token(&self) -> Result<SecretString, CoreError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh() {
                return Ok(token.access_token.clone());
            }
            debug!("Access token expires soon, re-authenticating");
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Forces a token exchange. Used at startup so bad credentials fail fast.
    pub async fn authenticate(&self) -> Result<(), CoreError> {
        let token = self.request_token().await?;
        *self.token.lock().await = Some(token);
        Ok(())
    }

    /// Drops the cached token after Reddit rejected it.
    pub async fn invalidate(&self) {
        if self.token.lock().await.take().is_some() {
            warn!("Discarding access token rejected by Reddit");
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token
            .lock()
            .await
            .as_ref()
            .is_some_and(|token| !token.is_expired())
    }

    async fn request_token(&self) -> Result<RedditToken, CoreError> {
        debug!(username = %self.username.as_str(), "Requesting access token");

        let http_client = self.http_client.clone();
        let response: BasicTokenResponse = self
            .oauth_client
            .exchange_password(&self.username, &self.password)
            .request_async(|request| send_token_request(http_client, request))
            .await
            .map_err(map_token_error)?;

        let expires_in = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let scope = response.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|scope| scope.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        });

        info!(
            "Authenticated as u/{} (token valid for {:?})",
            self.username.as_str(),
            expires_in
        );

        Ok(RedditToken {
            scope,
            ..RedditToken::from_lifetime(
                SecretString::new(response.access_token().secret().clone()),
                expires_in,
            )
        })
    }
}

/// Bridges the oauth2 request type onto our reqwest client so the token
/// exchange carries the bot's User-Agent.
async fn send_token_request(
    client: reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, CoreError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes()).map_err(|e| {
        CoreError::Internal {
            message: format!("invalid token request method: {}", e),
        }
    })?;

    let mut builder = client.request(method, request.url.as_str());
    for (name, value) in request.headers.iter() {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let response = builder.body(request.body).send().await.map_err(|e| {
        if e.is_timeout() {
            CoreError::RedditApi(RedditApiError::RequestTimeout)
        } else {
            CoreError::Network(e)
        }
    })?;

    let status_code = StatusCode::from_u16(response.status().as_u16()).map_err(|e| {
        CoreError::RedditApi(RedditApiError::InvalidResponse {
            details: e.to_string(),
        })
    })?;

    let mut headers = HeaderMap::new();
    for (name, value) in response.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }

    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

fn map_token_error(error: RequestTokenError<CoreError, BasicErrorResponse>) -> CoreError {
    match error {
        RequestTokenError::ServerResponse(response) => {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: response.to_string(),
            })
        }
        RequestTokenError::Request(inner) => inner,
        // Reddit answers bad credentials with `200 {"error": "invalid_grant"}`,
        // which only surfaces as a parse failure.
        RequestTokenError::Parse(_, body) => {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: String::from_utf8_lossy(&body).into_owned(),
            })
        }
        RequestTokenError::Other(reason) => {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })
        }
    }
}

fn invalid_url(error: oauth2::url::ParseError) -> CoreError {
    CoreError::Internal {
        message: format!("invalid OAuth endpoint: {}", error),
    }
}
