//! Ban checking
//!
//! Detection of ban transitions, the scheduled batch re-check, and the
//! fan-out of ban notices to group channels.

mod detect;
mod error;
mod notify;
mod schedule;
mod service;
mod summary;

pub use detect::{BanTransition, detect};
pub use error::{CheckError, CheckResult};
pub use notify::{BanNotice, DispatchReport, Dispatcher, NotifyScope};
pub use schedule::{
    BatchPlan, CheckRequest, DEFAULT_CHECKS_PER_DAY, Scheduler, batch_range, batch_size,
    slot_of_day, tick_period, until_next_slot,
};
pub use service::{BanChecker, CheckOutcome, Registration};
pub use summary::{
    BatchReport, CheckSummary, MESSAGE_LIMIT, chunk_lines, stats_message, user_lines,
};
