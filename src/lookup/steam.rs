//! Steam Web API client

use crate::identity::is_steam_id;
use crate::lookup::{LookupError, LookupResult, PlayerLookup, SteamLookup};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

/// Default Steam Web API endpoint
pub const STEAM_API_BASE: &str = "https://api.steampowered.com";

/// `ResolveVanityURL` success code
const VANITY_MATCH: u8 = 1;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
struct VanityResponse {
    success: u8,
    #[serde(default)]
    steamid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummariesResponse {
    #[serde(default)]
    players: Vec<PlayerSummary>,
}

#[derive(Debug, Deserialize)]
struct PlayerSummary {
    steamid: String,
    personaname: String,
}

#[derive(Debug, Deserialize)]
struct BansResponse {
    #[serde(default)]
    players: Vec<PlayerBans>,
}

#[derive(Debug, Deserialize)]
struct PlayerBans {
    #[serde(rename = "VACBanned")]
    vac_banned: bool,
    #[serde(rename = "NumberOfGameBans")]
    number_of_game_bans: u32,
    #[serde(rename = "DaysSinceLastBan")]
    days_since_last_ban: u32,
}

impl PlayerBans {
    fn days_since_last_ban(&self) -> Option<u32> {
        (self.vac_banned || self.number_of_game_bans > 0).then_some(self.days_since_last_ban)
    }
}

/// HTTP client for the parts of the Steam Web API the bot needs
pub struct SteamWebApi {
    http: Client,
    api_key: String,
    base_url: String,
}

impl SteamWebApi {
    /// Create a client against the public Steam Web API
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> LookupResult<Self> {
        Self::with_base_url(api_key, STEAM_API_BASE, timeout)
    }

    /// Create a client against a custom endpoint
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: &str,
        timeout: Duration,
    ) -> LookupResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("steam-ban-checker/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Make sure Steam accepts the configured key
    ///
    /// # Errors
    ///
    /// Returns `LookupError::InvalidCredential` if the key is refused.
    pub async fn validate_key(&self) -> LookupResult<()> {
        let _: serde_json::Value = self
            .get_json("ISteamWebAPIUtil/GetSupportedAPIList/v1/", &[])
            .await?;
        info!("Steam API key validated");
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> LookupResult<T> {
        let url = format!("{}/{path}", self.base_url);
        debug!(url = %url, "Calling Steam API");

        let response = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(LookupError::InvalidCredential);
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(LookupError::RateLimited),
            _ if !status.is_success() => {
                let message = response.text().await.unwrap_or_default();
                return Err(LookupError::Api {
                    status: status.as_u16(),
                    message,
                });
            }
            _ => {}
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| LookupError::Parse(e.to_string()))
    }

    async fn resolve_vanity(&self, vanity: &str) -> LookupResult<Option<u64>> {
        let envelope: Envelope<VanityResponse> = self
            .get_json("ISteamUser/ResolveVanityURL/v0001/", &[("vanityurl", vanity)])
            .await?;
        let response = envelope.response;
        if response.success != VANITY_MATCH {
            return Ok(None);
        }
        response
            .steamid
            .map(|id| parse_steam_id(&id))
            .transpose()
    }

    async fn player_summary(&self, steam_id: u64) -> LookupResult<Option<PlayerSummary>> {
        let id = steam_id.to_string();
        let envelope: Envelope<SummariesResponse> = self
            .get_json("ISteamUser/GetPlayerSummaries/v0002/", &[("steamids", id.as_str())])
            .await?;
        Ok(envelope
            .response
            .players
            .into_iter()
            .find(|player| player.steamid == id))
    }

    async fn player_bans(&self, steam_id: u64) -> LookupResult<Option<PlayerBans>> {
        let id = steam_id.to_string();
        let response: BansResponse = self
            .get_json("ISteamUser/GetPlayerBans/v1/", &[("steamids", id.as_str())])
            .await?;
        Ok(response.players.into_iter().next())
    }
}

fn parse_steam_id(raw: &str) -> LookupResult<u64> {
    raw.parse()
        .map_err(|_| LookupError::Parse(format!("invalid steam id {raw}")))
}

#[async_trait]
impl SteamLookup for SteamWebApi {
    async fn lookup(&self, identifier: &str) -> LookupResult<PlayerLookup> {
        // Numeric input is tried as an ID first, then as a vanity handle
        let mut summary = None;
        if is_steam_id(identifier) {
            if let Ok(steam_id) = identifier.parse::<u64>() {
                summary = self.player_summary(steam_id).await?;
            }
        }

        let summary = match summary {
            Some(summary) => summary,
            None => {
                let steam_id = self
                    .resolve_vanity(identifier)
                    .await?
                    .ok_or_else(|| LookupError::NotFound(identifier.to_string()))?;
                self.player_summary(steam_id)
                    .await?
                    .ok_or_else(|| LookupError::NotFound(identifier.to_string()))?
            }
        };

        let steam_id = parse_steam_id(&summary.steamid)?;
        let bans = self
            .player_bans(steam_id)
            .await?
            .ok_or_else(|| LookupError::NotFound(identifier.to_string()))?;

        Ok(PlayerLookup {
            steam_id,
            name: summary.personaname,
            days_since_last_ban: bans.days_since_last_ban(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_player_bans() {
        let body = r#"{"players":[{"SteamId":"76561197960435530","CommunityBanned":false,
            "VACBanned":true,"NumberOfVACBans":1,"DaysSinceLastBan":12,
            "NumberOfGameBans":0,"EconomyBan":"none"}]}"#;
        let response: BansResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.players[0].days_since_last_ban(), Some(12));
    }

    #[test]
    fn test_game_ban_counts_as_ban() {
        let bans = PlayerBans {
            vac_banned: false,
            number_of_game_bans: 2,
            days_since_last_ban: 40,
        };
        assert_eq!(bans.days_since_last_ban(), Some(40));
    }

    #[test]
    fn test_clean_record_has_no_ban_age() {
        let bans = PlayerBans {
            vac_banned: false,
            number_of_game_bans: 0,
            days_since_last_ban: 0,
        };
        assert_eq!(bans.days_since_last_ban(), None);
    }

    #[test]
    fn test_parse_vanity_miss() {
        let body = r#"{"response":{"success":42,"message":"No match"}}"#;
        let envelope: Envelope<VanityResponse> = serde_json::from_str(body).unwrap();
        assert_ne!(envelope.response.success, VANITY_MATCH);
        assert!(envelope.response.steamid.is_none());
    }

    #[test]
    fn test_parse_summaries() {
        let body = r#"{"response":{"players":[{"steamid":"76561197960435530",
            "personaname":"Robin","profileurl":"https://steamcommunity.com/id/robinwalker/"}]}}"#;
        let envelope: Envelope<SummariesResponse> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.response.players[0].personaname, "Robin");
    }

    #[test]
    fn test_client_normalizes_base_url() {
        let api =
            SteamWebApi::with_base_url("key", "http://localhost:1234/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(api.base_url, "http://localhost:1234");
    }
}
