//! Batch scheduling
//!
//! The tracked population is cut into `checks_per_day` equal slices. The
//! slice checked on a tick is chosen from the wall clock, so a restart picks
//! up the right slice without any stored cursor.

use crate::CHECKER_TARGET;
use crate::checker::BanChecker;
use chrono::{DateTime, Timelike, Utc};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

/// Default number of slices per day, one every hour
pub const DEFAULT_CHECKS_PER_DAY: u32 = 24;

const SECONDS_PER_DAY: u32 = 86_400;

/// Ticks land this far past a slot boundary
const SLOT_GRACE: Duration = Duration::from_secs(1);

/// Requests handled by the scheduler task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckRequest {
    /// Re-check every tracked user now
    CheckAll,
    /// Stop the scheduler task
    Shutdown,
}

/// Slice of the user table checked on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub slot: u32,
    pub offset: u64,
    pub limit: u64,
}

impl BatchPlan {
    /// Plan the batch for the slot containing `now`; `None` when nobody is tracked
    #[must_use]
    pub fn at(total_users: u64, now: DateTime<Utc>, checks_per_day: u32) -> Option<Self> {
        if total_users == 0 {
            return None;
        }
        let slot = slot_of_day(now, checks_per_day);
        let limit = batch_size(total_users, checks_per_day);
        Some(Self {
            slot,
            offset: limit * u64::from(slot),
            limit,
        })
    }
}

/// `ceil(total / checks_per_day)`
#[must_use]
pub fn batch_size(total_users: u64, checks_per_day: u32) -> u64 {
    total_users.div_ceil(u64::from(checks_per_day.max(1)))
}

/// Index of the slice of the UTC day containing `now`; the hour for 24 slices
#[must_use]
pub fn slot_of_day(now: DateTime<Utc>, checks_per_day: u32) -> u32 {
    let checks_per_day = checks_per_day.clamp(1, SECONDS_PER_DAY);
    let seconds = u64::from(now.num_seconds_from_midnight());
    let slot = seconds * u64::from(checks_per_day) / u64::from(SECONDS_PER_DAY);
    u32::try_from(slot).unwrap_or(checks_per_day - 1)
}

/// Row range a slot covers, clamped to the table size; trailing slots may be empty
#[must_use]
pub fn batch_range(total_users: u64, slot: u32, checks_per_day: u32) -> Range<u64> {
    let size = batch_size(total_users, checks_per_day);
    let start = size.saturating_mul(u64::from(slot)).min(total_users);
    let end = start.saturating_add(size).min(total_users);
    start..end
}

/// Time between ticks
#[must_use]
pub fn tick_period(checks_per_day: u32) -> Duration {
    Duration::from_secs(u64::from(SECONDS_PER_DAY / checks_per_day.clamp(1, SECONDS_PER_DAY)))
}

/// Delay from `now` until just after the next slot boundary
#[must_use]
pub fn until_next_slot(now: DateTime<Utc>, checks_per_day: u32) -> Duration {
    let checks_per_day = checks_per_day.clamp(1, SECONDS_PER_DAY);
    let next_slot = u64::from(slot_of_day(now, checks_per_day)) + 1;
    // First whole second belonging to the next slot, as `slot_of_day` counts it
    let boundary =
        (next_slot * u64::from(SECONDS_PER_DAY)).div_ceil(u64::from(checks_per_day));
    let elapsed = Duration::new(
        u64::from(now.num_seconds_from_midnight()),
        now.nanosecond().min(999_999_999),
    );
    Duration::from_secs(boundary).saturating_sub(elapsed) + SLOT_GRACE
}

/// Handle to the running scheduler task
pub struct Scheduler {
    tx: Sender<CheckRequest>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the scheduler task
    #[must_use]
    pub fn spawn(checker: Arc<BanChecker>, checks_per_day: u32) -> Self {
        let (tx, rx) = mpsc::channel::<CheckRequest>(16);
        let handle = tokio::spawn(run(checker, rx, checks_per_day));
        Self { tx, handle }
    }

    /// Sender for on-demand requests
    #[must_use]
    pub fn sender(&self) -> Sender<CheckRequest> {
        self.tx.clone()
    }

    /// Ask the task to stop and wait for it
    pub async fn shutdown(self) {
        if self.tx.send(CheckRequest::Shutdown).await.is_err() {
            error!(target: CHECKER_TARGET, "Scheduler task already stopped");
        }
        if let Err(e) = self.handle.await {
            error!(target: CHECKER_TARGET, "Scheduler task panicked: {e}");
        }
    }
}

/// Scheduler loop: one batch per tick, plus on-demand full checks
async fn run(checker: Arc<BanChecker>, mut rx: Receiver<CheckRequest>, checks_per_day: u32) {
    let period = tick_period(checks_per_day);
    info!(
        target: CHECKER_TARGET,
        checks_per_day,
        period_secs = period.as_secs(),
        "Starting ban check scheduler"
    );

    // First batch runs at once, later ones just after each slot boundary
    let next_tick = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(next_tick);

    loop {
        tokio::select! {
            request = rx.recv() => match request {
                Some(CheckRequest::CheckAll) => {
                    info!(target: CHECKER_TARGET, "Received request to check all users");
                    if let Err(e) = checker.check_all().await {
                        error!(target: CHECKER_TARGET, "Error checking all users: {e}");
                    }
                }
                Some(CheckRequest::Shutdown) | None => {
                    info!(target: CHECKER_TARGET, "Received shutdown request for scheduler");
                    break;
                }
            },

            () = &mut next_tick => {
                if let Err(e) = checker.run_batch(Utc::now()).await {
                    error!(target: CHECKER_TARGET, "Error in scheduled ban check: {e}");
                }
                // Re-read the clock so a slow batch skips slots instead of repeating them
                let delay = until_next_slot(Utc::now(), checks_per_day);
                next_tick.as_mut().reset(Instant::now() + delay);
            }
        }
    }

    info!(target: CHECKER_TARGET, "Ban check scheduler shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_batch_size_rounds_up() {
        assert_eq!(batch_size(0, 24), 0);
        assert_eq!(batch_size(1, 24), 1);
        assert_eq!(batch_size(24, 24), 1);
        assert_eq!(batch_size(25, 24), 2);
        assert_eq!(batch_size(100, 24), 5);
    }

    #[test]
    fn test_slot_is_hour_for_default_interval() {
        assert_eq!(slot_of_day(at(0, 0), 24), 0);
        assert_eq!(slot_of_day(at(13, 59), 24), 13);
        assert_eq!(slot_of_day(at(23, 59), 24), 23);
    }

    #[test]
    fn test_slot_for_coarser_interval() {
        assert_eq!(slot_of_day(at(1, 59), 12), 0);
        assert_eq!(slot_of_day(at(2, 0), 12), 1);
        assert_eq!(slot_of_day(at(23, 0), 1), 0);
    }

    #[test]
    fn test_plan_skips_empty_table() {
        assert_eq!(BatchPlan::at(0, at(5, 0), 24), None);
    }

    #[test]
    fn test_plan_offset_follows_hour() {
        let plan = BatchPlan::at(100, at(5, 30), 24).unwrap();
        assert_eq!(
            plan,
            BatchPlan {
                slot: 5,
                offset: 25,
                limit: 5
            }
        );
    }

    #[test]
    fn test_trailing_slots_can_be_empty() {
        // 25 users over 24 slots: 13 slots of 2, the rest empty
        assert_eq!(batch_range(25, 12, 24), 24..25);
        assert_eq!(batch_range(25, 13, 24), 25..25);
        assert_eq!(batch_range(25, 23, 24), 25..25);
    }

    #[test]
    fn test_next_tick_lands_in_next_slot() {
        assert_eq!(until_next_slot(at(5, 0), 24), Duration::from_secs(3601));
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 5, 59, 59).unwrap()
            + chrono::Duration::milliseconds(990);
        assert_eq!(until_next_slot(late, 24), Duration::from_millis(1010));
        assert_eq!(until_next_slot(at(23, 30), 24), Duration::from_secs(1801));

        // Started a hair before the hour: the next tick is the next hour, not the same one
        for checks_per_day in [1, 7, 24, 96] {
            for minute in [0, 17, 59] {
                let now = at(11, minute);
                let next = now
                    + chrono::Duration::from_std(until_next_slot(now, checks_per_day)).unwrap();
                assert_eq!(
                    slot_of_day(next, checks_per_day),
                    (slot_of_day(now, checks_per_day) + 1) % checks_per_day
                );
            }
        }
    }

    #[test]
    fn test_uneven_slots_follow_slot_of_day() {
        // 86400 / 7 is not whole; slot 1 starts at second 12343
        let midnight = at(0, 0);
        assert_eq!(until_next_slot(midnight, 7), Duration::from_secs(12_344));
        assert_eq!(slot_of_day(midnight + chrono::Duration::seconds(12_342), 7), 0);
        assert_eq!(slot_of_day(midnight + chrono::Duration::seconds(12_343), 7), 1);
    }

    #[test]
    fn test_tick_period() {
        assert_eq!(tick_period(24), Duration::from_secs(3600));
        assert_eq!(tick_period(1), Duration::from_secs(86_400));
        assert_eq!(tick_period(0), Duration::from_secs(86_400));
    }
}
