//! Check summaries and user-facing report text

use crate::store::{GroupStats, TrackedUser};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Discord rejects messages longer than this many characters
pub const MESSAGE_LIMIT: usize = 2000;

/// Outcome counts for one batch or full check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    /// Slot of the day, `None` for an on-demand full check
    pub slot: Option<u32>,
    pub offset: u64,
    pub selected: usize,
    pub checked: usize,
    pub escalated: usize,
    pub not_found: usize,
    pub transient: usize,
    pub failed: usize,
}

impl BatchReport {
    #[must_use]
    pub fn new(slot: Option<u32>, offset: u64, selected: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            slot,
            offset,
            selected,
            checked: 0,
            escalated: 0,
            not_found: 0,
            transient: 0,
            failed: 0,
        }
    }

    /// Number of users whose check did not complete
    #[must_use]
    pub fn errors(&self) -> usize {
        self.not_found + self.transient + self.failed
    }
}

/// Outcome counts for a set of identities found in chat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub processed: usize,
    pub escalated: usize,
    pub errors: usize,
}

/// Reply for the stats command
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn stats_message(stats: GroupStats) -> String {
    if stats.total == 0 {
        return "No players are being tracked.".to_string();
    }
    let percent = stats.banned as f64 / stats.total as f64 * 100.0;
    format!(
        "{} of {} players have been banned (or {percent:.2}%)",
        stats.banned, stats.total
    )
}

/// One line per user for the list command
#[must_use]
pub fn user_lines(users: &[TrackedUser], now: DateTime<Utc>) -> Vec<String> {
    users
        .iter()
        .map(|user| {
            let status = match user.days_since_last_ban(now) {
                None => "not banned".to_string(),
                Some(0) => "banned today".to_string(),
                Some(1) => "banned 1 day ago".to_string(),
                Some(days) => format!("banned {days} days ago"),
            };
            format!(
                "{} (<https://steamcommunity.com/profiles/{}>): {status}",
                user.name, user.id
            )
        })
        .collect()
}

/// Pack lines into messages of at most `limit` characters.
///
/// Lines are never split unless a single line is longer than `limit`, in
/// which case it is truncated.
#[must_use]
pub fn chunk_lines(lines: &[String], limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in lines {
        let line: String = line.chars().take(limit).collect();
        let line_len = line.chars().count();
        let needed = if current.is_empty() {
            line_len
        } else {
            current_len + 1 + line_len
        };

        if needed > limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(&line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stats_message_empty() {
        assert_eq!(
            stats_message(GroupStats::default()),
            "No players are being tracked."
        );
    }

    #[test]
    fn test_stats_message_percentage() {
        let stats = GroupStats {
            total: 8,
            banned: 2,
        };
        assert_eq!(
            stats_message(stats),
            "2 of 8 players have been banned (or 25.00%)"
        );

        let stats = GroupStats {
            total: 3,
            banned: 1,
        };
        assert_eq!(
            stats_message(stats),
            "1 of 3 players have been banned (or 33.33%)"
        );
    }

    #[test]
    fn test_user_lines() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        let users = vec![
            TrackedUser {
                id: 1,
                name: "clean".to_string(),
                date_added: now,
                date_banned: None,
            },
            TrackedUser {
                id: 2,
                name: "dirty".to_string(),
                date_added: now,
                date_banned: Some(Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap()),
            },
        ];

        let lines = user_lines(&users, now);
        assert_eq!(
            lines,
            vec![
                "clean (<https://steamcommunity.com/profiles/1>): not banned".to_string(),
                "dirty (<https://steamcommunity.com/profiles/2>): banned 3 days ago".to_string(),
            ]
        );
    }

    #[test]
    fn test_chunk_lines_respects_limit() {
        let lines: Vec<String> = (0..300).map(|i| format!("player number {i:04}")).collect();
        let chunks = chunk_lines(&lines, MESSAGE_LIMIT);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= MESSAGE_LIMIT));
        assert_eq!(chunks.join("\n"), lines.join("\n"));
    }

    #[test]
    fn test_chunk_lines_truncates_oversized_line() {
        let lines = vec!["short".to_string(), "x".repeat(25)];
        let chunks = chunk_lines(&lines, 10);
        assert_eq!(chunks, vec!["short".to_string(), "x".repeat(10)]);
    }

    #[test]
    fn test_chunk_lines_empty() {
        assert!(chunk_lines(&[], MESSAGE_LIMIT).is_empty());
    }

    #[test]
    fn test_batch_report_errors() {
        let mut report = BatchReport::new(Some(3), 30, 10);
        report.not_found = 1;
        report.transient = 2;
        report.failed = 1;
        assert_eq!(report.errors(), 4);
    }
}
