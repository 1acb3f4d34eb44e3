use crate::error::*;
use std::time::Duration;
use tracing::{error, info, warn};

/// Classification of errors for the reply loop, the logs and the exit message.
pub trait ErrorExt {
    /// Whether the same call may succeed later without operator action.
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    /// Stable upper-case code, e.g. `REDDIT_RATE_LIMIT`.
    fn error_code(&self) -> String;
    fn user_friendly_message(&self) -> String;
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
}

impl ErrorExt for CoreError {
    fn is_retryable(&self) -> bool {
        match self {
            CoreError::RedditApi(e) => !matches!(
                e,
                RedditApiError::AuthenticationFailed { .. }
                    | RedditApiError::Forbidden { .. }
                    | RedditApiError::SubredditNotFound { .. }
                    | RedditApiError::Rejected { .. }
            ),
            CoreError::Database(e) => matches!(
                e,
                DatabaseError::DatabaseLocked | DatabaseError::ConnectionFailed { .. }
            ),
            CoreError::Network(_) => true,
            CoreError::Config(_)
            | CoreError::Io(_)
            | CoreError::InvalidInput { .. }
            | CoreError::Internal { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after }) => {
                Some(Duration::from_secs(*retry_after))
            }
            CoreError::Database(DatabaseError::DatabaseLocked) => Some(Duration::from_millis(100)),
            CoreError::Network(_) => Some(Duration::from_secs(5)),
            _ if self.is_retryable() => Some(Duration::from_secs(30)),
            _ => None,
        }
    }

    fn error_code(&self) -> String {
        let code = match self {
            CoreError::RedditApi(e) => match e {
                RedditApiError::AuthenticationFailed { .. } => "REDDIT_AUTH_FAILED",
                RedditApiError::RateLimitExceeded { .. } => "REDDIT_RATE_LIMIT",
                RedditApiError::Forbidden { .. } => "REDDIT_FORBIDDEN",
                RedditApiError::SubredditNotFound { .. } => "REDDIT_SUBREDDIT_NOT_FOUND",
                RedditApiError::InvalidToken => "REDDIT_INVALID_TOKEN",
                RedditApiError::RequestTimeout => "REDDIT_TIMEOUT",
                RedditApiError::InvalidResponse { .. } => "REDDIT_INVALID_RESPONSE",
                RedditApiError::ServerError { .. } => "REDDIT_SERVER_ERROR",
                RedditApiError::CircuitOpen { .. } => "REDDIT_UNAVAILABLE",
                RedditApiError::Rejected { code, .. } => {
                    return format!("REDDIT_REJECTED_{}", code);
                }
            },
            CoreError::Database(e) => match e {
                DatabaseError::ConnectionFailed { .. } => "DB_CONNECTION_FAILED",
                DatabaseError::MigrationFailed { .. } => "DB_MIGRATION_FAILED",
                DatabaseError::DatabaseLocked => "DB_LOCKED",
                DatabaseError::Sql(_) => "DB_SQL_ERROR",
            },
            CoreError::Config(e) => match e {
                ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND",
                ConfigError::InvalidFormat { .. } => "CONFIG_INVALID_FORMAT",
                ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD",
                ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
                ConfigError::InvalidPattern { .. } => "CONFIG_INVALID_PATTERN",
                ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR",
                ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED",
                ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
            },
            CoreError::Io(_) => "IO",
            CoreError::Network(_) => "NETWORK",
            CoreError::InvalidInput { .. } => "INVALID_INPUT",
            CoreError::Internal { .. } => "INTERNAL",
        };
        code.to_string()
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::RedditApi(e) => match e {
                RedditApiError::AuthenticationFailed { .. } => {
                    "Reddit login failed. Check CLIENT_ID, CLIENT_SECRET, USERNAME and PASSWORD."
                        .to_string()
                }
                RedditApiError::RateLimitExceeded { retry_after } => {
                    format!("Reddit asked the bot to wait {} seconds.", retry_after)
                }
                RedditApiError::Forbidden { resource } => format!(
                    "Access denied to {}. The account may be banned or the thread locked.",
                    resource
                ),
                RedditApiError::SubredditNotFound { subreddit } => {
                    format!("Subreddit '{}' does not exist or is private.", subreddit)
                }
                RedditApiError::InvalidToken => {
                    "The Reddit access token was refused and will be renewed.".to_string()
                }
                RedditApiError::Rejected { message, .. } => {
                    format!("Reddit rejected the reply: {}", message)
                }
                other => format!("Reddit is not answering properly ({}).", other),
            },
            CoreError::Config(e) => match e {
                ConfigError::FileNotFound { path } => format!("Parameter file '{}' not found.", path),
                ConfigError::InvalidFormat { .. } | ConfigError::Parse(_) => {
                    "Parameter file is not valid YAML for this bot.".to_string()
                }
                ConfigError::MissingField { field } => {
                    format!("Required parameter '{}' is missing.", field)
                }
                ConfigError::InvalidValue { field, value } => {
                    format!("Invalid value {:?} for parameter '{}'.", value, field)
                }
                ConfigError::InvalidPattern { pattern, .. } => {
                    format!("The pattern '{}' is not a valid regular expression.", pattern)
                }
                ConfigError::MissingEnvironmentVariable { var_name } => {
                    format!("Environment variable '{}' is required but not set.", var_name)
                }
                ConfigError::ValidationFailed { reason } => reason.clone(),
            },
            CoreError::Database(DatabaseError::ConnectionFailed { .. }) => {
                "Seen-item database could not be opened. Check the seen_db path.".to_string()
            }
            CoreError::Database(DatabaseError::DatabaseLocked) => {
                "Seen-item database is busy. Is another bot instance running?".to_string()
            }
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            other => other.to_string(),
        }
    }

    fn log_error(&self) -> &Self {
        error!(code = %self.error_code(), "{}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!(code = %self.error_code(), retryable = self.is_retryable(), "{}", self);
        self
    }
}

/// Logs an error together with its code and the message shown to the operator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorReporter;

impl ErrorReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn report_error(&self, error: &CoreError) {
        error.log_error();
        info!("{}", error.user_friendly_message());
    }

    pub fn report_warning(&self, error: &CoreError) {
        error.log_warn();
        if let Some(retry_after) = error.retry_after() {
            info!("{} Retrying in {:?} at the earliest.", error.user_friendly_message(), retry_after);
        }
    }
}
