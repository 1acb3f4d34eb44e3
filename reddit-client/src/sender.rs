use crate::api::RedditApiClient;
use async_trait::async_trait;
use replybot_core::{CandidateItem, CoreError, ItemId, ReplySender};
use std::sync::Arc;
use tracing::{debug, warn};

/// How far back the account's own comment history is checked at startup.
pub const HISTORY_LIMIT: u32 = 100;

/// Posts replies as the authenticated account.
pub struct RedditReplySender {
    client: Arc<RedditApiClient>,
    username: String,
}

impl RedditReplySender {
    pub fn new(client: Arc<RedditApiClient>, username: String) -> Self {
        Self { client, username }
    }
}

#[async_trait]
impl ReplySender for RedditReplySender {
    async fn send_reply(&self, item: &CandidateItem, body: &str) -> Result<(), CoreError> {
        self.client.post_comment(&item.id.fullname(), body).await?;
        Ok(())
    }

    fn account_name(&self) -> Option<&str> {
        Some(&self.username)
    }

    async fn replied_targets(&self) -> Result<Vec<ItemId>, CoreError> {
        let comments = self
            .client
            .get_user_comments(&self.username, HISTORY_LIMIT)
            .await?;

        let targets = parent_ids(comments.iter().filter_map(|c| c.parent_id.as_deref()));
        debug!(
            "u/{} has {} recent replies on record",
            self.username,
            targets.len()
        );
        Ok(targets)
    }
}

fn parent_ids<'a>(fullnames: impl Iterator<Item = &'a str>) -> Vec<ItemId> {
    fullnames
        .filter_map(|fullname| match ItemId::parse_fullname(fullname) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Ignoring unexpected parent id {:?}: {}", fullname, e);
                None
            }
        })
        .collect()
}
