use crate::api::RedditApiClient;
use async_trait::async_trait;
use replybot_core::{CandidateItem, CoreError, ItemId, ItemSource, StreamKind};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// How many recently yielded ids are remembered to filter listing overlap.
pub const RECENT_WINDOW: usize = 301;

/// Streams new comments or submissions of one subreddit.
///
/// Each listing page overlaps the previous one; ids already yielded are
/// dropped so every item comes out at most once per source instance.
pub struct RedditItemSource {
    client: Arc<RedditApiClient>,
    subreddit: String,
    stream: StreamKind,
    limit: u32,
    recent: BoundedIdWindow,
}

impl RedditItemSource {
    pub fn new(client: Arc<RedditApiClient>, subreddit: String, stream: StreamKind, limit: u32) -> Self {
        Self {
            client,
            subreddit,
            stream,
            limit,
            recent: BoundedIdWindow::new(RECENT_WINDOW),
        }
    }

    pub fn subreddit(&self) -> &str {
        &self.subreddit
    }

    /// Keeps the items not yet yielded, oldest first, and remembers them.
    pub(crate) fn take_unseen(&mut self, mut items: Vec<CandidateItem>) -> Vec<CandidateItem> {
        items.sort_by(CandidateItem::chronological);
        items.retain(|item| self.recent.insert(item.id.clone()));
        items
    }
}

#[async_trait]
impl ItemSource for RedditItemSource {
    async fn fetch_new(&mut self) -> Result<Vec<CandidateItem>, CoreError> {
        let listing = match self.stream {
            StreamKind::Comments => self.client.get_new_comments(&self.subreddit, self.limit).await?,
            StreamKind::Submissions => {
                self.client
                    .get_new_submissions(&self.subreddit, self.limit)
                    .await?
            }
        };

        let fetched = listing.len();
        let items = self.take_unseen(listing);
        debug!(
            "r/{}: {} listed, {} new",
            self.subreddit,
            fetched,
            items.len()
        );
        Ok(items)
    }

    fn recent_window(&self) -> Option<usize> {
        Some(RECENT_WINDOW)
    }
}

#[derive(Debug)]
pub(crate) struct BoundedIdWindow {
    capacity: usize,
    order: VecDeque<ItemId>,
    members: HashSet<ItemId>,
}

impl BoundedIdWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Returns false when the id is already in the window.
    pub(crate) fn insert(&mut self, id: ItemId) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}
