use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use crate::{CoreError, RedditApiError};

/// The kind of Reddit thing an item is, as encoded in its fullname prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Comment,
    Submission,
}

impl ItemKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ItemKind::Comment => "t1",
            ItemKind::Submission => "t3",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "t1" => Some(ItemKind::Comment),
            "t3" => Some(ItemKind::Submission),
            _ => None,
        }
    }
}

/// Identifier of a candidate item. Displays as the Reddit fullname (`t1_abc123`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemId {
    kind: ItemKind,
    id: String,
}

impl ItemId {
    pub fn new(kind: ItemKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into().to_ascii_lowercase(),
        }
    }

    pub fn comment(id: impl Into<String>) -> Self {
        Self::new(ItemKind::Comment, id)
    }

    pub fn submission(id: impl Into<String>) -> Self {
        Self::new(ItemKind::Submission, id)
    }

    pub fn parse_fullname(fullname: &str) -> Result<Self, CoreError> {
        let invalid = || {
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("not a comment or submission fullname: {fullname}"),
            })
        };
        let (prefix, id) = fullname.split_once('_').ok_or_else(invalid)?;
        let kind = ItemKind::from_prefix(prefix).ok_or_else(invalid)?;
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        Ok(Self::new(kind, id))
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// The bare base-36 id without the kind prefix.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fullname(&self) -> String {
        format!("{}_{}", self.kind.prefix(), self.id)
    }

    /// Numeric value of the base-36 id. Reddit ids grow monotonically, so this
    /// orders items that share a creation timestamp.
    pub fn numeric(&self) -> Option<u64> {
        u64::from_str_radix(&self.id, 36).ok()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind.prefix(), self.id)
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => self.id.len().cmp(&other.id.len()).then_with(|| self.id.cmp(&other.id)),
            })
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A post or comment fetched from the source, eligible for pattern matching.
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub id: ItemId,
    pub author: String,
    pub body: String,
    pub created_utc: DateTime<Utc>,
    pub subreddit: String,
    pub permalink: Option<String>,
    /// Submission title, or the title of the submission a comment belongs to.
    pub title: Option<String>,
}

impl CandidateItem {
    /// Chronological order with identifier order as the tie-breaker.
    pub fn chronological(a: &CandidateItem, b: &CandidateItem) -> Ordering {
        a.created_utc
            .cmp(&b.created_utc)
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Deleted and removed items keep their id but lose their body.
    pub fn is_tombstone(&self) -> bool {
        let body = self.body.trim();
        body.is_empty() || body == "[deleted]" || body == "[removed]"
    }

    /// The body as a reader sees it: markdown links `[label](target)` are
    /// reduced to their label, so link targets never trigger a match.
    pub fn match_text(&self) -> Cow<'_, str> {
        if !self.body.contains("](") {
            return Cow::Borrowed(&self.body);
        }

        let mut text = String::with_capacity(self.body.len());
        let mut rest = self.body.as_str();
        while let Some(open) = rest.find('[') {
            text.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];
            let link = after_open.find(']').and_then(|close| {
                let target = after_open[close + 1..].strip_prefix('(')?;
                let end = target.find(')')?;
                Some((&after_open[..close], &target[end + 1..]))
            });
            match link {
                Some((label, remainder)) => {
                    text.push_str(label);
                    rest = remainder;
                }
                None => {
                    text.push('[');
                    rest = after_open;
                }
            }
        }
        text.push_str(rest);
        Cow::Owned(text)
    }

    pub fn is_authored_by(&self, username: &str) -> bool {
        self.author.eq_ignore_ascii_case(username)
    }

    /// Pretty, key-sorted JSON summary used when logging items and replies.
    pub fn log_summary(&self) -> String {
        let summary = serde_json::json!({
            "comment": self.body,
            "id": self.id.to_string(),
            "title": self.title,
        });
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| self.id.to_string())
    }
}
