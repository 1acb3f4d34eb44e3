use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

use crate::{CoreError, ItemId, SeenStore};

/// Seen-set that lives for the process lifetime only.
#[derive(Debug, Default)]
pub struct MemorySeenStore {
    ids: RwLock<HashSet<ItemId>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeenStore for MemorySeenStore {
    async fn contains(&self, id: &ItemId) -> Result<bool, CoreError> {
        Ok(self.ids.read().await.contains(id))
    }

    async fn record(&self, id: &ItemId, _replied: bool) -> Result<(), CoreError> {
        self.ids.write().await.insert(id.clone());
        Ok(())
    }

    async fn len(&self) -> Result<usize, CoreError> {
        Ok(self.ids.read().await.len())
    }
}
