//! Group settings with a read-through cache
//!
//! Every incoming message needs its group's prefix and notify channel, so
//! settings are served from memory and written through to the store.

use crate::store::{Group, GroupSetting, StoreResult, TrackedEntityStore};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

pub struct GroupDirectory {
    store: Arc<dyn TrackedEntityStore>,
    // group_id -> settings
    cache: DashMap<u64, Group>,
}

impl std::fmt::Debug for GroupDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupDirectory")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl GroupDirectory {
    pub fn new(store: Arc<dyn TrackedEntityStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Cached settings, without touching the store
    #[must_use]
    pub fn cached(&self, id: u64) -> Option<Group> {
        self.cache.get(&id).map(|entry| entry.value().clone())
    }

    /// Settings for a group, creating it with defaults on first sight
    pub async fn get(&self, id: u64) -> StoreResult<Group> {
        if let Some(group) = self.cached(id) {
            return Ok(group);
        }
        let group = self.store.get_or_create_group(id).await?;
        self.cache.insert(id, group.clone());
        Ok(group)
    }

    /// Make sure every group exists and is cached
    pub async fn ensure_all(&self, ids: &[u64]) -> StoreResult<Vec<Group>> {
        let mut groups = Vec::with_capacity(ids.len());
        for &id in ids {
            groups.push(self.get(id).await?);
        }
        info!(count = groups.len(), "Loaded group settings");
        Ok(groups)
    }

    /// Change one setting and refresh the cache
    pub async fn configure(&self, id: u64, setting: GroupSetting) -> StoreResult<Group> {
        let group = self.store.configure_group(id, setting).await?;
        self.cache.insert(id, group.clone());
        Ok(group)
    }

    /// Forget a group's cached settings
    pub fn invalidate(&self, id: u64) {
        self.cache.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn directory() -> (GroupDirectory, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        (GroupDirectory::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_get_creates_and_caches() {
        let (directory, store) = directory().await;
        assert!(directory.cached(5).is_none());

        let group = directory.get(5).await.unwrap();
        assert_eq!(group, Group::new(5));
        assert_eq!(directory.cached(5), Some(Group::new(5)));
        assert!(store.get_group(5).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_configure_writes_through() {
        let (directory, store) = directory().await;
        directory.get(5).await.unwrap();

        let group = directory
            .configure(5, GroupSetting::CommandPrefix('$'))
            .await
            .unwrap();
        assert_eq!(group.command_prefix, '$');
        assert_eq!(directory.cached(5).unwrap().command_prefix, '$');
        assert_eq!(
            store.get_group(5).await.unwrap().unwrap().command_prefix,
            '$'
        );
    }

    #[tokio::test]
    async fn test_invalidate_reloads_from_store() {
        let (directory, store) = directory().await;
        directory.get(5).await.unwrap();
        store
            .configure_group(5, GroupSetting::NotifyChannel(Some(9)))
            .await
            .unwrap();

        assert_eq!(directory.get(5).await.unwrap().notify_channel, None);
        directory.invalidate(5);
        assert_eq!(directory.get(5).await.unwrap().notify_channel, Some(9));
    }

    #[tokio::test]
    async fn test_ensure_all() {
        let (directory, store) = directory().await;
        let groups = directory.ensure_all(&[1, 2, 3]).await.unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(store.list_groups().await.unwrap().len(), 3);
    }
}
