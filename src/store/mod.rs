//! Tracked-entity store
//!
//! Plain records for tracked Steam users and the guilds that track them, and
//! the repository trait every persistence backend implements.

mod error;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Default command prefix for a new group
pub const DEFAULT_COMMAND_PREFIX: char = '!';

/// A Steam account the bot keeps an eye on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedUser {
    /// Steam 64-bit ID
    pub id: u64,
    /// Last known persona name
    pub name: String,
    pub date_added: DateTime<Utc>,
    /// Midnight of the day of the most recent known ban
    pub date_banned: Option<DateTime<Utc>>,
}

impl TrackedUser {
    /// Whole days between the recorded ban and `now`
    #[must_use]
    pub fn days_since_last_ban(&self, now: DateTime<Utc>) -> Option<i64> {
        self.date_banned.map(|banned| (now - banned).num_days())
    }
}

/// A guild with its bot settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Discord guild ID
    pub id: u64,
    pub command_prefix: char,
    /// Channel that receives ban notices and is scanned for links
    pub notify_channel: Option<u64>,
}

impl Group {
    /// A group with default settings
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            command_prefix: DEFAULT_COMMAND_PREFIX,
            notify_channel: None,
        }
    }
}

/// A single group setting change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSetting {
    CommandPrefix(char),
    NotifyChannel(Option<u64>),
}

/// Result of registering or refreshing a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub user: TrackedUser,
    /// The user did not exist before this call
    pub created: bool,
    /// The stored ban date moved forward in this call
    pub ban_advanced: bool,
}

/// Tracked and banned counts for a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupStats {
    pub total: u64,
    pub banned: u64,
}

/// Truncate a timestamp to midnight UTC of the same day
#[must_use]
pub fn normalize_ban_date(date: DateTime<Utc>) -> DateTime<Utc> {
    date.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Repository over tracked users and groups.
///
/// Every mutating call is a single transaction committed before it returns.
#[async_trait]
pub trait TrackedEntityStore: Send + Sync {
    /// Fetch a group, creating it with defaults if absent
    async fn get_or_create_group(&self, id: u64) -> StoreResult<Group>;

    async fn get_group(&self, id: u64) -> StoreResult<Option<Group>>;

    /// Apply one setting to a group, creating the group if needed
    async fn configure_group(&self, id: u64, setting: GroupSetting) -> StoreResult<Group>;

    async fn list_groups(&self) -> StoreResult<Vec<Group>>;

    /// Create or refresh a user.
    ///
    /// The name is always overwritten. The ban date is only written when it
    /// is later than the stored one. Membership is added for every group.
    async fn upsert_user(
        &self,
        id: u64,
        name: &str,
        ban_date: Option<DateTime<Utc>>,
        group_ids: &[u64],
    ) -> StoreResult<UpsertOutcome>;

    async fn get_user(&self, id: u64) -> StoreResult<Option<TrackedUser>>;

    async fn count_users(&self) -> StoreResult<u64>;

    /// Users ordered by ID, for batched scans
    async fn list_users(&self, offset: u64, limit: u64) -> StoreResult<Vec<TrackedUser>>;

    async fn groups_for_user(&self, user_id: u64) -> StoreResult<Vec<Group>>;

    /// Users tracked by a group, optionally only the banned ones
    async fn group_users(&self, group_id: u64, banned_only: bool) -> StoreResult<Vec<TrackedUser>>;

    /// Drop a user from a group, deleting the user once no group tracks it.
    /// Returns false if the user was not a member.
    async fn remove_user_from_group(&self, user_id: u64, group_id: u64) -> StoreResult<bool>;

    async fn stats(&self, group_id: u64) -> StoreResult<GroupStats>;
}
