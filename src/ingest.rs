//! Ingestion of Steam links posted in chat
//!
//! Messages in a group's notify channel are scanned for Steam identities.
//! The bot's own reaction marks a message as handled, which makes replaying
//! channel history on startup safe.

use crate::EVENT_TARGET;
use crate::chat::{ChatMessage, ChatPort, HISTORY_LIMIT, ScanMark};
use crate::checker::{BanChecker, CheckSummary};
use crate::groups::GroupDirectory;
use crate::identity;
use crate::store::{Group, StoreResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a message was not scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    DirectMessage,
    OwnMessage,
    Empty,
    Command,
    NoChannel,
    OtherChannel,
    AlreadyReacted,
}

/// What happened to an incoming message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ignored(IgnoreReason),
    Scanned {
        identities: Vec<String>,
        summary: CheckSummary,
    },
}

pub struct Ingestor {
    checker: Arc<BanChecker>,
    groups: Arc<GroupDirectory>,
    chat: Arc<dyn ChatPort>,
}

impl Ingestor {
    pub fn new(
        checker: Arc<BanChecker>,
        groups: Arc<GroupDirectory>,
        chat: Arc<dyn ChatPort>,
    ) -> Self {
        Self {
            checker,
            groups,
            chat,
        }
    }

    /// Scan a live message and check what it links to
    pub async fn handle_message(&self, message: &ChatMessage) -> StoreResult<IngestOutcome> {
        let Some(group_id) = message.group_id else {
            return Ok(IngestOutcome::Ignored(IgnoreReason::DirectMessage));
        };
        let group = self.groups.get(group_id).await?;

        let identities = match self.scan(message, &group).await {
            Ok(identities) => identities,
            Err(reason) => {
                debug!(target: EVENT_TARGET, message_id = message.id, ?reason, "Ignoring message");
                return Ok(IngestOutcome::Ignored(reason));
            }
        };

        let batch = identities
            .iter()
            .map(|identity| (identity.clone(), vec![group_id]))
            .collect();
        let summary = self.checker.process_identities(batch).await;
        Ok(IngestOutcome::Scanned {
            identities,
            summary,
        })
    }

    /// Replay recent history of every configured channel.
    ///
    /// Groups are created for every ID given. Channels that cannot be read
    /// are logged and skipped.
    pub async fn backfill(&self, group_ids: &[u64]) -> StoreResult<CheckSummary> {
        let groups = self.groups.ensure_all(group_ids).await?;

        let mut batch: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for group in &groups {
            let Some(channel_id) = group.notify_channel else {
                continue;
            };
            let history = match self.chat.history(channel_id, HISTORY_LIMIT).await {
                Ok(history) => history,
                Err(e) => {
                    warn!(
                        target: EVENT_TARGET,
                        group_id = group.id,
                        channel_id,
                        "Failed to read channel history: {e}"
                    );
                    continue;
                }
            };

            info!(
                target: EVENT_TARGET,
                group_id = group.id,
                channel_id,
                messages = history.len(),
                "Checking channel for missed messages"
            );

            for mut message in history {
                // REST history carries no guild ID
                message.group_id = Some(group.id);
                if let Ok(identities) = self.scan(&message, group).await {
                    for identity in identities {
                        let groups = batch.entry(identity).or_default();
                        if !groups.contains(&group.id) {
                            groups.push(group.id);
                        }
                    }
                }
            }
        }

        debug!(target: EVENT_TARGET, count = batch.len(), "Found missed identities");
        Ok(self.checker.process_identities(batch).await)
    }

    /// Apply the ignore rules, then extract identities and mark the message
    async fn scan(
        &self,
        message: &ChatMessage,
        group: &Group,
    ) -> Result<Vec<String>, IgnoreReason> {
        let reason = if message.from_self {
            Some(IgnoreReason::OwnMessage)
        } else if message.content.trim().is_empty() {
            Some(IgnoreReason::Empty)
        } else if message.content.starts_with(group.command_prefix) {
            Some(IgnoreReason::Command)
        } else {
            match group.notify_channel {
                None => Some(IgnoreReason::NoChannel),
                Some(channel) if channel != message.channel_id => {
                    Some(IgnoreReason::OtherChannel)
                }
                Some(_) if message.reacted_by_self => Some(IgnoreReason::AlreadyReacted),
                Some(_) => None,
            }
        };
        if let Some(reason) = reason {
            return Err(reason);
        }

        let identities = identity::extract_permissive(&message.content);
        let mark = if identities.is_empty() {
            ScanMark::NothingFound
        } else {
            ScanMark::Found
        };
        if let Err(e) = self
            .chat
            .add_reaction(message.channel_id, message.id, mark)
            .await
        {
            warn!(
                target: EVENT_TARGET,
                message_id = message.id,
                "Failed to react to message: {e}"
            );
        }

        debug!(
            target: EVENT_TARGET,
            message_id = message.id,
            count = identities.len(),
            "Found identities in message"
        );
        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatError, MockChatPort};
    use crate::checker::Dispatcher;
    use crate::lookup::{LookupGateway, MockSteamLookup, PlayerLookup};
    use crate::store::{GroupSetting, SqliteStore, TrackedEntityStore};
    use std::time::Duration;

    const GROUP: u64 = 10;
    const CHANNEL: u64 = 20;
    const PROFILE: &str = "https://steamcommunity.com/profiles/76561198000000007";

    fn message(id: u64, content: &str) -> ChatMessage {
        ChatMessage {
            id,
            channel_id: CHANNEL,
            group_id: Some(GROUP),
            content: content.to_string(),
            from_self: false,
            reacted_by_self: false,
        }
    }

    fn lookup() -> MockSteamLookup {
        let mut lookup = MockSteamLookup::new();
        lookup.expect_lookup().returning(|identifier| {
            Ok(PlayerLookup {
                steam_id: identifier.parse().unwrap_or(76_561_198_000_000_099),
                name: format!("player-{identifier}"),
                days_since_last_ban: None,
            })
        });
        lookup
    }

    async fn ingestor(chat: MockChatPort) -> (Ingestor, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        store
            .configure_group(GROUP, GroupSetting::NotifyChannel(Some(CHANNEL)))
            .await
            .unwrap();

        let gateway = LookupGateway::new(Arc::new(lookup()), 2, Duration::from_secs(5));
        let dispatcher = Dispatcher::new(Arc::new(MockChatPort::new()), store.clone());
        let checker = Arc::new(BanChecker::new(gateway, store.clone(), dispatcher, 24));
        let groups = Arc::new(GroupDirectory::new(store.clone()));
        (Ingestor::new(checker, groups, Arc::new(chat)), store)
    }

    #[tokio::test]
    async fn test_link_is_registered_and_marked() {
        let mut chat = MockChatPort::new();
        chat.expect_add_reaction()
            .withf(|channel, message, mark| {
                *channel == CHANNEL && *message == 1 && *mark == ScanMark::Found
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (ingestor, store) = ingestor(chat).await;
        let outcome = ingestor
            .handle_message(&message(1, &format!("look at {PROFILE}")))
            .await
            .unwrap();

        match outcome {
            IngestOutcome::Scanned {
                identities,
                summary,
            } => {
                assert_eq!(identities, vec!["76561198000000007".to_string()]);
                assert_eq!(summary.processed, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let groups = store.groups_for_user(76_561_198_000_000_007).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, GROUP);
    }

    #[tokio::test]
    async fn test_message_without_links_gets_thumbs_down() {
        let mut chat = MockChatPort::new();
        chat.expect_add_reaction()
            .withf(|_, _, mark| *mark == ScanMark::NothingFound)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (ingestor, store) = ingestor(chat).await;
        let outcome = ingestor
            .handle_message(&message(2, "gg wp"))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            IngestOutcome::Scanned { ref identities, .. } if identities.is_empty()
        ));
        assert_eq!(store.count_users().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ignore_rules() {
        let mut chat = MockChatPort::new();
        chat.expect_add_reaction().never();
        let (ingestor, _store) = ingestor(chat).await;

        let mut own = message(1, PROFILE);
        own.from_self = true;
        let mut reacted = message(2, PROFILE);
        reacted.reacted_by_self = true;
        let mut elsewhere = message(3, PROFILE);
        elsewhere.channel_id = CHANNEL + 1;
        let mut direct = message(4, PROFILE);
        direct.group_id = None;

        let cases = [
            (own, IgnoreReason::OwnMessage),
            (reacted, IgnoreReason::AlreadyReacted),
            (elsewhere, IgnoreReason::OtherChannel),
            (direct, IgnoreReason::DirectMessage),
            (message(5, "   "), IgnoreReason::Empty),
            (message(6, &format!("!add {PROFILE}")), IgnoreReason::Command),
        ];
        for (message, reason) in cases {
            assert_eq!(
                ingestor.handle_message(&message).await.unwrap(),
                IngestOutcome::Ignored(reason)
            );
        }
    }

    #[tokio::test]
    async fn test_group_without_channel_is_ignored() {
        let mut chat = MockChatPort::new();
        chat.expect_add_reaction().never();
        let (ingestor, _store) = ingestor(chat).await;

        let mut unconfigured = message(1, PROFILE);
        unconfigured.group_id = Some(GROUP + 1);
        assert_eq!(
            ingestor.handle_message(&unconfigured).await.unwrap(),
            IngestOutcome::Ignored(IgnoreReason::NoChannel)
        );
    }

    #[tokio::test]
    async fn test_backfill_skips_reacted_messages() {
        let mut chat = MockChatPort::new();
        chat.expect_history()
            .withf(|channel, limit| *channel == CHANNEL && *limit == HISTORY_LIMIT)
            .times(1)
            .returning(|_, _| {
                let mut done = message(1, "https://steamcommunity.com/profiles/76561198000000001");
                done.reacted_by_self = true;
                done.group_id = None;
                let mut fresh = message(2, "https://csgostats.gg/player/76561198000000002");
                fresh.group_id = None;
                Ok(vec![fresh, done])
            });
        chat.expect_add_reaction()
            .withf(|_, message, _| *message == 2)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (ingestor, store) = ingestor(chat).await;
        let summary = ingestor.backfill(&[GROUP, GROUP + 1]).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert!(store.get_user(76_561_198_000_000_002).await.unwrap().is_some());
        assert!(store.get_user(76_561_198_000_000_001).await.unwrap().is_none());
        assert_eq!(store.list_groups().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backfill_survives_unreadable_channel() {
        let mut chat = MockChatPort::new();
        chat.expect_history()
            .returning(|_, _| Err(ChatError::Delivery("missing access".to_string())));

        let (ingestor, _store) = ingestor(chat).await;
        let summary = ingestor.backfill(&[GROUP]).await.unwrap();
        assert_eq!(summary.processed, 0);
    }
}
