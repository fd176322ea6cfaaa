//! SQLite backend for the tracked-entity store

use crate::store::{
    Group, GroupSetting, GroupStats, StoreError, StoreResult, TrackedEntityStore, TrackedUser,
    UpsertOutcome, normalize_ban_date,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Attempts made before a busy database is reported as a conflict
const MAX_ATTEMPTS: u32 = 4;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tracked_group (
        id INTEGER PRIMARY KEY,
        command_prefix TEXT NOT NULL DEFAULT '!',
        notify_channel INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS tracked_user (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        date_added INTEGER NOT NULL,
        date_banned INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS group_membership (
        group_id INTEGER NOT NULL REFERENCES tracked_group(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES tracked_user(id) ON DELETE CASCADE,
        PRIMARY KEY (group_id, user_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_group_membership_user ON group_membership(user_id)",
];

const USER_COLUMNS: &str = "u.id, u.name, u.date_added, u.date_banned";

/// Tracked-entity store on a SQLite file
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database file, creating it and its schema on first run
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, connection or schema cannot be created.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let fresh = !path.exists();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(database = %path.display(), "Opened database");
        if fresh {
            info!("Creating database schema");
        }

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema cannot be created.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to :memory: is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Schema(e.to_string()))?;
        }
        Ok(())
    }

    /// Run a transactional operation, retrying while the database is busy
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Err(e) if e.is_conflict() && attempts < MAX_ATTEMPTS => {
                    let backoff = rand::rng().random_range(20..100) * u64::from(attempts);
                    warn!(
                        operation = %operation,
                        attempt = attempts,
                        backoff_ms = backoff,
                        "Database busy, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) if e.is_conflict() => return Err(StoreError::Conflict { attempts }),
                result => return result,
            }
        }
    }

    async fn upsert_once(
        &self,
        id: u64,
        name: &str,
        ban_date: Option<DateTime<Utc>>,
        group_ids: &[u64],
    ) -> StoreResult<UpsertOutcome> {
        let user_id = to_sql_id(id)?;
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query(
            "INSERT OR IGNORE INTO tracked_user (id, name, date_added) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(name)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !created {
            sqlx::query("UPDATE tracked_user SET name = ? WHERE id = ?")
                .bind(name)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        // Single conditional write so a stale date can never overwrite a newer one
        let mut ban_advanced = false;
        if let Some(date) = ban_date {
            let banned_at = normalize_ban_date(date).timestamp();
            ban_advanced = sqlx::query(
                "UPDATE tracked_user SET date_banned = ?
                 WHERE id = ? AND (date_banned IS NULL OR date_banned < ?)",
            )
            .bind(banned_at)
            .bind(user_id)
            .bind(banned_at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;
        }

        for group_id in group_ids {
            let group_id = to_sql_id(*group_id)?;
            sqlx::query("INSERT OR IGNORE INTO tracked_group (id) VALUES (?)")
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT OR IGNORE INTO group_membership (group_id, user_id) VALUES (?, ?)")
                .bind(group_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM tracked_user u WHERE u.id = ?"
        ))
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let user = user_from_row(&row)?;

        tx.commit().await?;

        Ok(UpsertOutcome {
            user,
            created,
            ban_advanced,
        })
    }

    async fn configure_once(&self, id: u64, setting: GroupSetting) -> StoreResult<Group> {
        let group_id = to_sql_id(id)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO tracked_group (id) VALUES (?)")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        match setting {
            GroupSetting::CommandPrefix(prefix) => {
                sqlx::query("UPDATE tracked_group SET command_prefix = ? WHERE id = ?")
                    .bind(prefix.to_string())
                    .bind(group_id)
                    .execute(&mut *tx)
                    .await?;
            }
            GroupSetting::NotifyChannel(channel) => {
                sqlx::query("UPDATE tracked_group SET notify_channel = ? WHERE id = ?")
                    .bind(channel.map(to_sql_id).transpose()?)
                    .bind(group_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let row = sqlx::query(
            "SELECT id, command_prefix, notify_channel FROM tracked_group WHERE id = ?",
        )
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;
        let group = group_from_row(&row)?;

        tx.commit().await?;
        Ok(group)
    }

    async fn remove_once(&self, user_id: u64, group_id: u64) -> StoreResult<bool> {
        let user_id = to_sql_id(user_id)?;
        let group_id = to_sql_id(group_id)?;
        let mut tx = self.pool.begin().await?;

        let removed =
            sqlx::query("DELETE FROM group_membership WHERE group_id = ? AND user_id = ?")
                .bind(group_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                == 1;

        if removed {
            sqlx::query(
                "DELETE FROM tracked_user WHERE id = ?
                 AND NOT EXISTS (SELECT 1 FROM group_membership WHERE user_id = ?)",
            )
            .bind(user_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed)
    }
}

#[async_trait]
impl TrackedEntityStore for SqliteStore {
    async fn get_or_create_group(&self, id: u64) -> StoreResult<Group> {
        let group_id = to_sql_id(id)?;
        self.with_retry("get_or_create_group", || async {
            sqlx::query("INSERT OR IGNORE INTO tracked_group (id) VALUES (?)")
                .bind(group_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await?;

        self.get_group(id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("group {id} vanished after insert")))
    }

    async fn get_group(&self, id: u64) -> StoreResult<Option<Group>> {
        let row = sqlx::query(
            "SELECT id, command_prefix, notify_channel FROM tracked_group WHERE id = ?",
        )
        .bind(to_sql_id(id)?)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn configure_group(&self, id: u64, setting: GroupSetting) -> StoreResult<Group> {
        self.with_retry("configure_group", || self.configure_once(id, setting))
            .await
    }

    async fn list_groups(&self) -> StoreResult<Vec<Group>> {
        let rows = sqlx::query(
            "SELECT id, command_prefix, notify_channel FROM tracked_group ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn upsert_user(
        &self,
        id: u64,
        name: &str,
        ban_date: Option<DateTime<Utc>>,
        group_ids: &[u64],
    ) -> StoreResult<UpsertOutcome> {
        self.with_retry("upsert_user", || {
            self.upsert_once(id, name, ban_date, group_ids)
        })
        .await
    }

    async fn get_user(&self, id: u64) -> StoreResult<Option<TrackedUser>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM tracked_user u WHERE u.id = ?"
        ))
        .bind(to_sql_id(id)?)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn count_users(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracked_user")
            .fetch_one(&self.pool)
            .await?;
        from_sql_count(count)
    }

    async fn list_users(&self, offset: u64, limit: u64) -> StoreResult<Vec<TrackedUser>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM tracked_user u ORDER BY u.id LIMIT ? OFFSET ?"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn groups_for_user(&self, user_id: u64) -> StoreResult<Vec<Group>> {
        let rows = sqlx::query(
            "SELECT g.id, g.command_prefix, g.notify_channel FROM tracked_group g
             JOIN group_membership m ON m.group_id = g.id
             WHERE m.user_id = ? ORDER BY g.id",
        )
        .bind(to_sql_id(user_id)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn group_users(&self, group_id: u64, banned_only: bool) -> StoreResult<Vec<TrackedUser>> {
        let filter = if banned_only {
            "AND u.date_banned IS NOT NULL ORDER BY u.date_banned DESC, u.id"
        } else {
            "ORDER BY u.name COLLATE NOCASE, u.id"
        };
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM tracked_user u
             JOIN group_membership m ON m.user_id = u.id
             WHERE m.group_id = ? {filter}"
        ))
        .bind(to_sql_id(group_id)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn remove_user_from_group(&self, user_id: u64, group_id: u64) -> StoreResult<bool> {
        self.with_retry("remove_user_from_group", || {
            self.remove_once(user_id, group_id)
        })
        .await
    }

    async fn stats(&self, group_id: u64) -> StoreResult<GroupStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(u.date_banned) AS banned
             FROM group_membership m JOIN tracked_user u ON u.id = m.user_id
             WHERE m.group_id = ?",
        )
        .bind(to_sql_id(group_id)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(GroupStats {
            total: from_sql_count(row.try_get("total")?)?,
            banned: from_sql_count(row.try_get("banned")?)?,
        })
    }
}

fn to_sql_id(id: u64) -> StoreResult<i64> {
    i64::try_from(id).map_err(|_| StoreError::InvalidId(id))
}

fn from_sql_id(id: i64) -> StoreResult<u64> {
    u64::try_from(id).map_err(|_| StoreError::Corrupt(format!("negative id {id}")))
}

fn from_sql_count(count: i64) -> StoreResult<u64> {
    u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {count}")))
}

fn from_sql_timestamp(seconds: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("invalid timestamp {seconds}")))
}

fn user_from_row(row: &SqliteRow) -> StoreResult<TrackedUser> {
    Ok(TrackedUser {
        id: from_sql_id(row.try_get("id")?)?,
        name: row.try_get("name")?,
        date_added: from_sql_timestamp(row.try_get("date_added")?)?,
        date_banned: row
            .try_get::<Option<i64>, _>("date_banned")?
            .map(from_sql_timestamp)
            .transpose()?,
    })
}

fn group_from_row(row: &SqliteRow) -> StoreResult<Group> {
    let prefix: String = row.try_get("command_prefix")?;
    Ok(Group {
        id: from_sql_id(row.try_get("id")?)?,
        command_prefix: prefix
            .chars()
            .next()
            .ok_or_else(|| StoreError::Corrupt("empty command prefix".to_string()))?,
        notify_channel: row
            .try_get::<Option<i64>, _>("notify_channel")?
            .map(from_sql_id)
            .transpose()?,
    })
}
