//! Ban notices and their fan-out to group channels

use crate::CHECKER_TARGET;
use crate::chat::ChatPort;
use crate::store::{StoreResult, TrackedEntityStore};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// A user whose ban moved forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanNotice {
    pub user_id: u64,
    pub name: String,
    /// Midnight of the ban day
    pub banned_on: DateTime<Utc>,
    /// Whole days between the ban and the check
    pub days_ago: i64,
}

impl BanNotice {
    #[must_use]
    pub fn new(user_id: u64, name: &str, banned_on: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            name: name.to_string(),
            banned_on,
            days_ago: (now - banned_on).num_days().max(0),
        }
    }

    #[must_use]
    pub fn title(&self) -> String {
        let elapsed = match self.days_ago {
            0 => "less than a day".to_string(),
            1 => "1 day".to_string(),
            days => format!("{days} days"),
        };
        format!("{} was last banned {elapsed} ago", self.name)
    }

    #[must_use]
    pub fn description(&self) -> String {
        format!(
            "[View their profile on Steam]({})\n[View their profile on CSGO Stats]({})",
            self.profile_url(),
            self.stats_url()
        )
    }

    #[must_use]
    pub fn profile_url(&self) -> String {
        format!("https://steamcommunity.com/profiles/{}", self.user_id)
    }

    #[must_use]
    pub fn stats_url(&self) -> String {
        format!("https://csgostats.gg/player/{}", self.user_id)
    }
}

/// Which groups hear about a ban
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyScope {
    /// Only these groups, when the user is a member
    Groups(Vec<u64>),
    /// Every group tracking the user
    AllMemberships,
}

/// Per-notice delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Groups without a notify channel
    pub skipped: usize,
    pub failed: usize,
}

/// Delivers ban notices to the notify channels of member groups
#[derive(Clone)]
pub struct Dispatcher {
    chat: Arc<dyn ChatPort>,
    store: Arc<dyn TrackedEntityStore>,
}

impl Dispatcher {
    pub fn new(chat: Arc<dyn ChatPort>, store: Arc<dyn TrackedEntityStore>) -> Self {
        Self { chat, store }
    }

    /// Send one embed per distinct channel in scope.
    ///
    /// Delivery failures are logged and counted, they never stop the other
    /// channels. Only the membership lookup can fail the call.
    pub async fn dispatch(
        &self,
        notice: &BanNotice,
        scope: &NotifyScope,
    ) -> StoreResult<DispatchReport> {
        let groups = self.store.groups_for_user(notice.user_id).await?;

        let mut report = DispatchReport::default();
        let mut channels = BTreeSet::new();
        for group in groups {
            if let NotifyScope::Groups(ids) = scope {
                if !ids.contains(&group.id) {
                    continue;
                }
            }
            match group.notify_channel {
                Some(channel) => {
                    channels.insert(channel);
                }
                None => {
                    debug!(
                        target: CHECKER_TARGET,
                        group_id = group.id,
                        "Group has no notify channel, skipping"
                    );
                    report.skipped += 1;
                }
            }
        }

        let sends = channels.iter().map(|&channel| async move {
            (channel, self.chat.send_notice(channel, notice).await)
        });

        for (channel, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        target: CHECKER_TARGET,
                        channel_id = channel,
                        user_id = notice.user_id,
                        "Failed to deliver ban notice: {e}"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
