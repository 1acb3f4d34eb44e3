//! Bot parameters (the YAML `--params` file) and Reddit credentials (the
//! environment).
//!
//! Both are loaded once at startup and handed to the bot by value; nothing
//! here is global.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::duration::parse_duration;
use crate::ConfigError;

pub const DEFAULT_VERSION: &str = "0.0.0";
pub const DEFAULT_FETCH_LIMIT: u32 = 100;
pub const MAX_FETCH_LIMIT: u32 = 100;

/// Which listing of the subreddit the bot watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    #[default]
    Comments,
    Submissions,
}

#[derive(Debug, Clone)]
pub struct BotParams {
    /// If true, matches are logged but no replies are made.
    pub dry_run: bool,
    /// The pattern that triggers a reply.
    pub pattern: String,
    /// The reply markdown string.
    pub reply: String,
    /// Normalised subreddit path segment, e.g. `rust` or `u_someone`.
    pub subreddit: String,
    /// Suspension between two fetch cycles.
    pub timeout: Duration,
    pub stream: StreamKind,
    pub case_sensitive: bool,
    /// SQLite file for the persistent Seen-set. In-memory when absent.
    pub seen_db: Option<PathBuf>,
    pub fetch_limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParams {
    #[serde(default)]
    dry_run: bool,
    pattern: Option<String>,
    reply: Option<String>,
    subreddit: Option<String>,
    timeout: Option<RawDuration>,
    #[serde(default)]
    stream: StreamKind,
    #[serde(default)]
    case_sensitive: bool,
    seen_db: Option<PathBuf>,
    fetch_limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(f64),
    Text(String),
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        field: field.to_string(),
    })
}

impl BotParams {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => ConfigError::InvalidFormat {
                details: format!("failed to read {}: {}", path.display(), e),
            },
        })?;

        let params = Self::from_yaml_str(&contents)?;
        info!("Loaded bot parameters from {}", path.display());
        Ok(params)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawParams = serde_yaml_ng::from_str(contents)?;

        let timeout = match required(raw.timeout, "timeout")? {
            RawDuration::Seconds(secs) => {
                Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
                    field: "timeout".to_string(),
                    value: secs.to_string(),
                })?
            }
            RawDuration::Text(text) => {
                parse_duration(&text).map_err(|_| ConfigError::InvalidValue {
                    field: "timeout".to_string(),
                    value: text.clone(),
                })?
            }
        };
        if timeout.is_zero() {
            return Err(ConfigError::ValidationFailed {
                reason: "timeout must be greater than zero".to_string(),
            });
        }

        let reply = required(raw.reply, "reply")?;
        if reply.trim().is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: "reply must not be empty".to_string(),
            });
        }

        let raw_subreddit = required(raw.subreddit, "subreddit")?;
        let subreddit = normalize_subreddit(&raw_subreddit)?;

        let fetch_limit = raw.fetch_limit.unwrap_or(DEFAULT_FETCH_LIMIT);
        if fetch_limit == 0 || fetch_limit > MAX_FETCH_LIMIT {
            return Err(ConfigError::InvalidValue {
                field: "fetch_limit".to_string(),
                value: fetch_limit.to_string(),
            });
        }

        let params = Self {
            dry_run: raw.dry_run,
            pattern: required(raw.pattern, "pattern")?,
            reply,
            subreddit,
            timeout,
            stream: raw.stream,
            case_sensitive: raw.case_sensitive,
            seen_db: raw.seen_db,
            fetch_limit,
        };
        debug!(?params, "Parsed bot parameters");
        Ok(params)
    }

    /// Compiles the trigger pattern. Case-insensitive unless `case_sensitive` is set.
    pub fn compile_pattern(&self) -> Result<Regex, ConfigError> {
        RegexBuilder::new(&self.pattern)
            .case_insensitive(!self.case_sensitive)
            .build()
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: self.pattern.clone(),
                reason: e.to_string(),
            })
    }
}

/// Turns `r/Rust`, `/r/rust/` or `rust` into `rust`, and `u/Someone` into the
/// profile subreddit `u_someone`.
pub fn normalize_subreddit(raw: &str) -> Result<String, ConfigError> {
    let lowered = raw.trim().trim_matches('/').to_ascii_lowercase();

    let name = if let Some(user) = lowered.strip_prefix("u/") {
        format!("u_{}", user.trim_matches('/'))
    } else if let Some(user) = lowered.strip_prefix("user/") {
        format!("u_{}", user.trim_matches('/'))
    } else if let Some(sub) = lowered.strip_prefix("r/") {
        sub.trim_matches('/').to_string()
    } else {
        lowered
    };

    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '-');
    if !valid {
        return Err(ConfigError::InvalidValue {
            field: "subreddit".to_string(),
            value: raw.to_string(),
        });
    }
    Ok(name)
}

/// A string that never shows up in `Debug` or `Display` output.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Script-app credentials for the bot account.
/// See <https://www.reddit.com/prefs/apps>.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    pub password: SecretString,
    pub version: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                    var_name: name.to_string(),
                })
        };

        Ok(Self {
            client_id: var("CLIENT_ID")?,
            client_secret: SecretString::new(var("CLIENT_SECRET")?),
            username: var("USERNAME")?,
            password: SecretString::new(var("PASSWORD")?),
            version: lookup("VERSION")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        })
    }

    /// The unique user agent string for the bot.
    pub fn user_agent(&self) -> String {
        format!("{}-{}-{}", self.username, self.client_id, self.version)
    }
}
