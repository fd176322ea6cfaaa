//! Steam identity extraction
//!
//! Finds candidate Steam identifiers in free-form text. Two modes are
//! available: strict matching for a single explicit identity (command
//! arguments) and permissive scanning for profile links inside chat messages.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors raised while extracting identities
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// Nothing in the input looks like a Steam identity
    #[error("No Steam identity found in: {0}")]
    NotFound(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

fn steam_id_regex() -> &'static Regex {
    static STEAM_ID_REGEX: OnceLock<Regex> = OnceLock::new();
    STEAM_ID_REGEX
        .get_or_init(|| Regex::new(r"^[1-9][0-9]*$").expect("Failed to compile steam id regex"))
}

fn username_regex() -> &'static Regex {
    static USERNAME_REGEX: OnceLock<Regex> = OnceLock::new();
    USERNAME_REGEX
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("Failed to compile username regex"))
}

/// URL shapes recognised in chat messages, each capturing the identity segment
fn url_regexes() -> &'static [Regex; 3] {
    static URL_REGEXES: OnceLock<[Regex; 3]> = OnceLock::new();
    URL_REGEXES.get_or_init(|| {
        [
            Regex::new(r"https?://steamcommunity\.com/id/([A-Za-z0-9_-]+)")
                .expect("Failed to compile community url regex"),
            Regex::new(r"https?://steamcommunity\.com/profiles/([1-9][0-9]*)")
                .expect("Failed to compile profile url regex"),
            Regex::new(r"https?://csgostats\.gg/player/([1-9][0-9]*)")
                .expect("Failed to compile csgostats url regex"),
        ]
    })
}

/// Returns true if the identity is a bare Steam ID rather than a vanity handle
#[must_use]
pub fn is_steam_id(candidate: &str) -> bool {
    steam_id_regex().is_match(candidate)
}

/// Match a single explicit identity: a bare Steam ID or an alphanumeric handle.
///
/// # Errors
///
/// Returns `IdentityError::NotFound` if the input is neither.
pub fn extract_strict(input: &str) -> IdentityResult<String> {
    let candidate = input.trim();
    if steam_id_regex().is_match(candidate) || username_regex().is_match(candidate) {
        Ok(candidate.to_string())
    } else {
        Err(IdentityError::NotFound(input.to_string()))
    }
}

/// Scan text for every profile link it mentions, in order of appearance.
///
/// Matches from different URL shapes are kept separately even if they
/// overlap, and duplicates are not removed.
#[must_use]
pub fn extract_permissive(input: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = url_regexes()
        .iter()
        .flat_map(|regex| {
            regex.captures_iter(input).filter_map(|captures| {
                captures
                    .get(1)
                    .map(|m| (m.start(), m.as_str().to_string()))
            })
        })
        .collect();

    // Stable, so equal positions keep regex order
    found.sort_by_key(|(position, _)| *position);
    found.into_iter().map(|(_, identity)| identity).collect()
}

/// Parse a command argument: a profile link if one is present, otherwise a
/// bare ID or handle.
///
/// # Errors
///
/// Returns `IdentityError::NotFound` if the argument holds no identity.
pub fn extract_argument(input: &str) -> IdentityResult<String> {
    match extract_permissive(input).into_iter().next() {
        Some(identity) => Ok(identity),
        None => extract_strict(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_finds_profile_and_stats_links_in_order() {
        let found = extract_permissive(
            "check https://steamcommunity.com/profiles/76561198000000000 and https://csgostats.gg/player/76561198000000001",
        );
        assert_eq!(found, vec!["76561198000000000", "76561198000000001"]);
    }

    #[test]
    fn test_permissive_vanity_url_stops_at_whitespace_and_slash() {
        let found = extract_permissive(
            "look at http://steamcommunity.com/id/someone/ he is sus, also https://steamcommunity.com/id/other here",
        );
        assert_eq!(found, vec!["someone", "other"]);
    }

    #[test]
    fn test_permissive_vanity_url_drops_brackets_and_punctuation() {
        assert_eq!(
            extract_permissive("<https://steamcommunity.com/id/gaben>"),
            vec!["gaben"]
        );
        assert_eq!(
            extract_permissive("https://steamcommunity.com/id/gaben, and (https://steamcommunity.com/id/some_one-2)."),
            vec!["gaben", "some_one-2"]
        );
        assert_eq!(
            extract_argument("<https://steamcommunity.com/id/gaben>"),
            Ok("gaben".to_string())
        );
    }

    #[test]
    fn test_permissive_keeps_duplicates() {
        let found = extract_permissive(
            "https://csgostats.gg/player/76561198000000001 https://csgostats.gg/player/76561198000000001#/matches",
        );
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_permissive_ignores_plain_text() {
        assert!(extract_permissive("gg wp 76561198000000000").is_empty());
        assert!(extract_permissive("").is_empty());
    }

    #[test]
    fn test_strict_accepts_handle_and_id() {
        assert_eq!(extract_strict("abc123"), Ok("abc123".to_string()));
        assert_eq!(
            extract_strict(" 76561198000000000 "),
            Ok("76561198000000000".to_string())
        );
    }

    #[test]
    fn test_strict_rejects_symbols() {
        assert_eq!(
            extract_strict("!!!"),
            Err(IdentityError::NotFound("!!!".to_string()))
        );
        assert!(extract_strict("two words").is_err());
    }

    #[test]
    fn test_argument_prefers_links() {
        assert_eq!(
            extract_argument("https://steamcommunity.com/id/gaben"),
            Ok("gaben".to_string())
        );
        assert_eq!(extract_argument("gaben"), Ok("gaben".to_string()));
        assert!(extract_argument("???").is_err());
    }

    #[test]
    fn test_is_steam_id() {
        assert!(is_steam_id("76561198000000000"));
        assert!(!is_steam_id("0123"));
        assert!(!is_steam_id("gaben"));
    }
}
