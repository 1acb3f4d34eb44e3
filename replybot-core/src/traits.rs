//! Seams between the reply loop and the outside world.

use async_trait::async_trait;

use crate::{CandidateItem, CoreError, ItemId};

/// A lazy, in-order, non-restartable sequence of candidate items.
///
/// Each call returns the items that became available since the previous call,
/// oldest first. An item returned once is never returned again by the same
/// source.
#[async_trait]
pub trait ItemSource: Send {
    async fn fetch_new(&mut self) -> Result<Vec<CandidateItem>, CoreError>;

    /// How many of the most recently returned items the source still tracks.
    /// `None` means the source never forgets.
    fn recent_window(&self) -> Option<usize> {
        None
    }
}

/// Capability to post a reply under an item.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_reply(&self, item: &CandidateItem, body: &str) -> Result<(), CoreError>;

    /// Account name the replies are posted as. Items by this author are never answered.
    fn account_name(&self) -> Option<&str> {
        None
    }

    /// Items this account has already answered, as far as the remote side remembers.
    async fn replied_targets(&self) -> Result<Vec<ItemId>, CoreError> {
        Ok(Vec::new())
    }
}

/// The Seen-set: identifiers already replied to or considered and skipped.
///
/// `record` must be durable per item before it returns.
#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn contains(&self, id: &ItemId) -> Result<bool, CoreError>;

    /// Records an item. `replied` tells whether a reply was actually posted.
    /// Recording an id twice is a no-op.
    async fn record(&self, id: &ItemId, replied: bool) -> Result<(), CoreError>;

    async fn len(&self) -> Result<usize, CoreError>;
}
