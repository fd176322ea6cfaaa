use crate::checker::{BanChecker, CheckRequest};
use crate::groups::GroupDirectory;
use crate::ingest::Ingestor;
use crate::store::TrackedEntityStore;
use poise::serenity_prelude::prelude::TypeMapKey;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

/// Shared state handed to commands and event handlers
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("groups", &self.groups)
            .field("check_tx", &self.check_tx)
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(
        checker: Arc<BanChecker>,
        groups: Arc<GroupDirectory>,
        ingestor: Arc<Ingestor>,
        check_tx: Sender<CheckRequest>,
    ) -> Self {
        Self(Arc::new(DataInner {
            checker,
            groups,
            ingestor,
            check_tx,
        }))
    }

    /// The store behind the checker
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TrackedEntityStore> {
        self.checker.store()
    }

    /// Command prefix for a guild; `None` outside guilds or if the settings
    /// cannot be loaded
    pub async fn command_prefix(&self, guild_id: Option<u64>) -> Option<String> {
        let group = match guild_id {
            Some(id) => self.groups.get(id).await.ok()?,
            None => return None,
        };
        Some(group.command_prefix.to_string())
    }
}

pub struct DataInner {
    pub checker: Arc<BanChecker>,
    // Cached per-guild settings
    pub groups: Arc<GroupDirectory>,
    pub ingestor: Arc<Ingestor>,
    // Requests to the scheduler task
    pub check_tx: Sender<CheckRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MockChatPort;
    use crate::checker::Dispatcher;
    use crate::lookup::{LookupGateway, MockSteamLookup};
    use crate::store::{GroupSetting, SqliteStore};
    use std::time::Duration;

    async fn data() -> (Data, tokio::sync::mpsc::Receiver<CheckRequest>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let gateway = LookupGateway::new(
            Arc::new(MockSteamLookup::new()),
            1,
            Duration::from_secs(1),
        );
        let dispatcher = Dispatcher::new(Arc::new(MockChatPort::new()), store.clone());
        let checker = Arc::new(BanChecker::new(gateway, store.clone(), dispatcher, 24));
        let groups = Arc::new(GroupDirectory::new(store));
        let ingestor = Arc::new(Ingestor::new(
            Arc::clone(&checker),
            Arc::clone(&groups),
            Arc::new(MockChatPort::new()),
        ));
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        (Data::new(checker, groups, ingestor, tx), rx)
    }

    #[tokio::test]
    async fn test_command_prefix() {
        let (data, _rx) = data().await;
        assert_eq!(data.command_prefix(None).await, None);
        assert_eq!(data.command_prefix(Some(1)).await, Some("!".to_string()));

        data.groups
            .configure(1, GroupSetting::CommandPrefix('%'))
            .await
            .unwrap();
        assert_eq!(data.command_prefix(Some(1)).await, Some("%".to_string()));
    }

    #[tokio::test]
    async fn test_check_requests_reach_receiver() {
        let (data, mut rx) = data().await;
        data.check_tx.send(CheckRequest::CheckAll).await.unwrap();
        assert_eq!(rx.recv().await, Some(CheckRequest::CheckAll));
    }

    #[tokio::test]
    async fn test_debug_output() {
        let (data, _rx) = data().await;
        let debug_output = format!("{data:?}");
        assert!(debug_output.contains("groups"));
        assert!(debug_output.contains("check_tx"));
    }
}
