//! Ban transition detection

use crate::store::normalize_ban_date;
use chrono::{DateTime, Utc};

/// Outcome of comparing a stored ban date with a freshly fetched one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanTransition {
    /// Nothing worth reporting
    Same,
    /// First ban, or a ban on a later day than the stored one; carries the
    /// new date normalized to midnight
    Escalated(DateTime<Utc>),
}

impl BanTransition {
    /// The date to persist, if any
    #[must_use]
    pub fn escalated_date(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Same => None,
            Self::Escalated(date) => Some(date),
        }
    }
}

/// Compare by calendar day. A fetched `None` never clears a stored ban.
#[must_use]
pub fn detect(previous: Option<DateTime<Utc>>, fetched: Option<DateTime<Utc>>) -> BanTransition {
    match (previous, fetched) {
        (_, None) => BanTransition::Same,
        (None, Some(fetched)) => BanTransition::Escalated(normalize_ban_date(fetched)),
        (Some(previous), Some(fetched)) if fetched.date_naive() > previous.date_naive() => {
            BanTransition::Escalated(normalize_ban_date(fetched))
        }
        (Some(_), Some(_)) => BanTransition::Same,
    }
}
