//! Steam lookup gateway
//!
//! `SteamLookup` is the port to the upstream player API. `LookupGateway` wraps
//! it with a bounded worker pool and a timeout, and turns the upstream
//! "days since last ban" into a ban timestamp.

mod error;
mod steam;

pub use error::{LookupError, LookupResult};
pub use steam::{STEAM_API_BASE, SteamWebApi};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Player record as reported by the upstream API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerLookup {
    /// Canonical Steam 64-bit ID
    pub steam_id: u64,
    /// Current persona name
    pub name: String,
    /// Days since the most recent VAC or game ban, `None` if never banned
    pub days_since_last_ban: Option<u32>,
}

/// Player with the ban expressed as a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlayer {
    pub id: u64,
    pub name: String,
    pub ban_timestamp: Option<DateTime<Utc>>,
}

impl ResolvedPlayer {
    /// Build from an upstream record, anchoring the ban age at `now`
    #[must_use]
    pub fn from_lookup(lookup: PlayerLookup, now: DateTime<Utc>) -> Self {
        Self {
            id: lookup.steam_id,
            name: lookup.name,
            ban_timestamp: lookup
                .days_since_last_ban
                .map(|days| now - ChronoDuration::days(i64::from(days))),
        }
    }
}

/// Port to the upstream player API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SteamLookup: Send + Sync {
    /// Resolve a Steam ID or vanity handle to its player record
    async fn lookup(&self, identifier: &str) -> LookupResult<PlayerLookup>;
}

/// Uniform, bounded access to the upstream player API
#[derive(Clone)]
pub struct LookupGateway {
    backend: Arc<dyn SteamLookup>,
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl LookupGateway {
    /// Create a gateway running at most `workers` lookups at once
    pub fn new(backend: Arc<dyn SteamLookup>, workers: usize, timeout: Duration) -> Self {
        Self {
            backend,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    /// Resolve an identifier using the current time as the ban anchor
    pub async fn resolve(&self, identifier: &str) -> LookupResult<ResolvedPlayer> {
        self.resolve_at(identifier, Utc::now()).await
    }

    /// Resolve an identifier on a worker task.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::Timeout` if the upstream call exceeds the
    /// configured timeout, or whatever the backend reports.
    pub async fn resolve_at(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> LookupResult<ResolvedPlayer> {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|e| LookupError::Worker(e.to_string()))?;

        let backend = Arc::clone(&self.backend);
        let owned_identifier = identifier.to_string();
        let timeout = self.timeout;

        let worker = tokio::spawn(async move {
            let _permit = permit;
            tokio::time::timeout(timeout, backend.lookup(&owned_identifier)).await
        });

        let lookup = match worker.await {
            Ok(Ok(result)) => result?,
            Ok(Err(_elapsed)) => return Err(LookupError::Timeout(timeout)),
            Err(join_error) => return Err(LookupError::Worker(join_error.to_string())),
        };

        debug!(
            identifier = %identifier,
            steam_id = lookup.steam_id,
            days_since_last_ban = ?lookup.days_since_last_ban,
            "Resolved Steam identity"
        );
        Ok(ResolvedPlayer::from_lookup(lookup, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn player(days: Option<u32>) -> PlayerLookup {
        PlayerLookup {
            steam_id: 76_561_198_000_000_000,
            name: "gaben".to_string(),
            days_since_last_ban: days,
        }
    }

    #[test]
    fn test_resolved_player_ban_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();

        let resolved = ResolvedPlayer::from_lookup(player(Some(5)), now);
        assert_eq!(
            resolved.ban_timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 15, 30, 0).unwrap())
        );

        let resolved = ResolvedPlayer::from_lookup(player(None), now);
        assert_eq!(resolved.ban_timestamp, None);
    }

    #[tokio::test]
    async fn test_gateway_passes_backend_result_through() {
        let mut backend = MockSteamLookup::new();
        backend
            .expect_lookup()
            .withf(|identifier| identifier == "gaben")
            .times(1)
            .returning(|_| Ok(player(Some(0))));

        let gateway = LookupGateway::new(Arc::new(backend), 2, Duration::from_secs(5));
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let resolved = gateway.resolve_at("gaben", now).await.unwrap();

        assert_eq!(resolved.id, 76_561_198_000_000_000);
        assert_eq!(resolved.ban_timestamp, Some(now));
    }

    #[tokio::test]
    async fn test_gateway_propagates_not_found() {
        let mut backend = MockSteamLookup::new();
        backend
            .expect_lookup()
            .returning(|identifier| Err(LookupError::NotFound(identifier.to_string())));

        let gateway = LookupGateway::new(Arc::new(backend), 1, Duration::from_secs(5));
        let result = gateway.resolve("nobody").await;
        assert!(matches!(result, Err(LookupError::NotFound(id)) if id == "nobody"));
    }

    struct SlowLookup;

    #[async_trait]
    impl SteamLookup for SlowLookup {
        async fn lookup(&self, _identifier: &str) -> LookupResult<PlayerLookup> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(player(None))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_times_out_slow_lookups() {
        let gateway = LookupGateway::new(Arc::new(SlowLookup), 1, Duration::from_secs(10));
        let result = gateway.resolve("slow").await;
        assert!(matches!(result, Err(LookupError::Timeout(d)) if d == Duration::from_secs(10)));
    }
}
