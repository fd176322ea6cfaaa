//! The ban check service

use crate::checker::detect::{BanTransition, detect};
use crate::checker::error::{CheckError, CheckResult};
use crate::checker::notify::{BanNotice, DispatchReport, Dispatcher, NotifyScope};
use crate::checker::schedule::BatchPlan;
use crate::checker::summary::{BatchReport, CheckSummary};
use crate::identity::is_steam_id;
use crate::logging::log_batch_report;
use crate::lookup::{LookupError, LookupGateway, ResolvedPlayer};
use crate::CHECKER_TARGET;
use crate::store::{TrackedEntityStore, TrackedUser};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Whether a check may start tracking the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Track the user in these groups and notify only them
    Register(Vec<u64>),
    /// Refresh the user if already tracked, notify every member group
    TrackedOnly,
}

/// Result of checking one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub player: ResolvedPlayer,
    pub transition: BanTransition,
    /// Stored record after the check, `None` if the user is not tracked
    pub user: Option<TrackedUser>,
    /// Set when this check advanced the stored ban date
    pub notified: Option<DispatchReport>,
}

impl CheckOutcome {
    /// Upstream reports a ban of any age
    #[must_use]
    pub fn is_banned(&self) -> bool {
        self.player.ban_timestamp.is_some()
    }
}

/// Checks Steam identities for bans and records what it finds
pub struct BanChecker {
    gateway: LookupGateway,
    store: Arc<dyn TrackedEntityStore>,
    dispatcher: Dispatcher,
    checks_per_day: u32,
}

impl BanChecker {
    pub fn new(
        gateway: LookupGateway,
        store: Arc<dyn TrackedEntityStore>,
        dispatcher: Dispatcher,
        checks_per_day: u32,
    ) -> Self {
        Self {
            gateway,
            store,
            dispatcher,
            checks_per_day,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TrackedEntityStore> {
        &self.store
    }

    /// Check one identity now
    pub async fn check_identity(
        &self,
        identity: &str,
        registration: Registration,
    ) -> CheckResult<CheckOutcome> {
        self.check_identity_at(identity, registration, Utc::now()).await
    }

    /// Look up an identity, persist what changed and notify on a new ban.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or the store write fails. Notification
    /// failures are logged only.
    pub async fn check_identity_at(
        &self,
        identity: &str,
        registration: Registration,
        now: DateTime<Utc>,
    ) -> CheckResult<CheckOutcome> {
        let player = self.gateway.resolve_at(identity, now).await?;
        let previous = self.store.get_user(player.id).await?;
        let transition = detect(
            previous.as_ref().and_then(|user| user.date_banned),
            player.ban_timestamp,
        );

        let group_ids: &[u64] = match &registration {
            Registration::Register(group_ids) => group_ids,
            Registration::TrackedOnly if previous.is_some() => &[],
            Registration::TrackedOnly => {
                debug!(
                    target: CHECKER_TARGET,
                    user_id = player.id,
                    "User is not tracked, nothing to record"
                );
                return Ok(CheckOutcome {
                    player,
                    transition,
                    user: None,
                    notified: None,
                });
            }
        };

        let outcome = self
            .store
            .upsert_user(player.id, &player.name, player.ban_timestamp, group_ids)
            .await?;

        if outcome.created {
            info!(
                target: CHECKER_TARGET,
                user_id = player.id,
                name = %player.name,
                "Started tracking user"
            );
        }

        let mut notified = None;
        if let (true, Some(banned_on)) = (outcome.ban_advanced, outcome.user.date_banned) {
            warn!(
                target: CHECKER_TARGET,
                user_id = player.id,
                banned_on = %banned_on.date_naive(),
                "User has been banned"
            );

            let notice = BanNotice::new(player.id, &outcome.user.name, banned_on, now);
            let scope = match registration {
                Registration::Register(group_ids) => NotifyScope::Groups(group_ids),
                Registration::TrackedOnly => NotifyScope::AllMemberships,
            };
            match self.dispatcher.dispatch(&notice, &scope).await {
                Ok(report) => notified = Some(report),
                Err(e) => error!(
                    target: CHECKER_TARGET,
                    user_id = player.id,
                    "Failed to resolve channels for ban notice: {e}"
                ),
            }
        } else {
            debug!(target: CHECKER_TARGET, user_id = player.id, "Ban status has not changed");
        }

        Ok(CheckOutcome {
            player,
            transition,
            user: Some(outcome.user),
            notified,
        })
    }

    /// Register and check identities found in chat, each scoped to the
    /// groups it was seen in
    pub async fn process_identities(
        &self,
        identities: BTreeMap<String, Vec<u64>>,
    ) -> CheckSummary {
        let now = Utc::now();
        let checks = identities.into_iter().map(|(identity, group_ids)| async move {
            let result = self
                .check_identity_at(&identity, Registration::Register(group_ids), now)
                .await;
            (identity, result)
        });

        let mut summary = CheckSummary::default();
        for (identity, result) in join_all(checks).await {
            summary.processed += 1;
            match result {
                Ok(outcome) => {
                    if outcome.notified.is_some() {
                        summary.escalated += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        target: CHECKER_TARGET,
                        identity = %identity,
                        "Failed to process identity: {e}"
                    );
                    summary.errors += 1;
                }
            }
        }

        info!(
            target: CHECKER_TARGET,
            processed = summary.processed,
            escalated = summary.escalated,
            errors = summary.errors,
            "Processed identities"
        );
        summary
    }

    /// Resolve an identity to a tracked user and drop it from a group.
    ///
    /// Returns the removed user, or `None` if the group was not tracking it.
    pub async fn remove_identity(
        &self,
        identity: &str,
        group_id: u64,
    ) -> CheckResult<Option<TrackedUser>> {
        let user_id = match identity.parse::<u64>() {
            Ok(id) if is_steam_id(identity) => id,
            _ => self.gateway.resolve(identity).await?.id,
        };

        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(None);
        };
        if self.store.remove_user_from_group(user_id, group_id).await? {
            info!(target: CHECKER_TARGET, user_id, group_id, "Stopped tracking user in group");
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Check the slice of users owned by the slot containing `now`.
    ///
    /// Returns `None` when nobody is tracked.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> CheckResult<Option<BatchReport>> {
        let total = self.store.count_users().await?;
        let Some(plan) = BatchPlan::at(total, now, self.checks_per_day) else {
            debug!(target: CHECKER_TARGET, "No users tracked, skipping batch");
            return Ok(None);
        };

        let users = self.store.list_users(plan.offset, plan.limit).await?;
        let report = BatchReport::new(Some(plan.slot), plan.offset, users.len());
        let report = self.check_users(users, report, now).await;
        log_batch_report(&report);
        Ok(Some(report))
    }

    /// Check every tracked user
    pub async fn check_all(&self) -> CheckResult<BatchReport> {
        let now = Utc::now();
        let total = self.store.count_users().await?;
        let users = self.store.list_users(0, total).await?;
        let report = BatchReport::new(None, 0, users.len());
        let report = self.check_users(users, report, now).await;
        log_batch_report(&report);
        Ok(report)
    }

    async fn check_users(
        &self,
        users: Vec<TrackedUser>,
        mut report: BatchReport,
        now: DateTime<Utc>,
    ) -> BatchReport {
        let checks = users.iter().map(|user| async move {
            let result = self
                .check_identity_at(&user.id.to_string(), Registration::TrackedOnly, now)
                .await;
            (user.id, result)
        });

        for (user_id, result) in join_all(checks).await {
            match result {
                Ok(outcome) => {
                    report.checked += 1;
                    if outcome.notified.is_some() {
                        report.escalated += 1;
                    }
                }
                Err(e) => {
                    record_failure(&mut report, user_id, &e);
                }
            }
        }
        report
    }
}

fn record_failure(report: &mut BatchReport, user_id: u64, error: &CheckError) {
    if error.is_not_found() {
        report.not_found += 1;
    } else if error.is_transient() {
        report.transient += 1;
    } else {
        report.failed += 1;
    }
    match error {
        CheckError::Lookup(LookupError::InvalidCredential) => {
            error!(target: CHECKER_TARGET, user_id, "Steam API rejected the key: {error}");
        }
        _ => warn!(target: CHECKER_TARGET, user_id, "Ban check failed: {error}"),
    }
}
