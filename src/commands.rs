use crate::checker::{
    CheckRequest, MESSAGE_LIMIT, Registration, chunk_lines, stats_message, user_lines,
};
use crate::identity::extract_argument;
use crate::store::GroupSetting;
use crate::{COMMAND_TARGET, Context, Error};
use chrono::Utc;
use poise::serenity_prelude as serenity;
use tracing::info;

pub const USER_NOT_FOUND: &str = "Could not find user!";
pub const CHANNEL_REQUIRED: &str = "Please mention a channel.";
pub const PREFIX_LENGTH: &str = "Command character can only be of length 1 (e.g.: !, $, %)";

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![check(), add(), remove(), channel(), command(), stats(), list()]
}

fn guild_id(ctx: Context<'_>) -> Result<u64, Error> {
    Ok(ctx
        .guild_id()
        .ok_or("This command can only be used in a server")?
        .get())
}

/// Reply for a single ban check
#[must_use]
pub fn ban_status_reply(name: &str, banned: bool) -> String {
    if banned {
        format!("{name} has been banned!")
    } else {
        format!("{name} has *not* been banned!")
    }
}

/// Validate a new command prefix
///
/// # Errors
///
/// Returns the reply to send if the input is not exactly one character.
pub fn parse_prefix(input: &str) -> Result<char, &'static str> {
    let mut chars = input.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(prefix), None) => Ok(prefix),
        _ => Err(PREFIX_LENGTH),
    }
}

/// Check a Steam profile for bans, or re-check every tracked player
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn check(
    ctx: Context<'_>,
    #[rest]
    #[description = "Steam ID, vanity name or profile link"]
    identity: Option<String>,
) -> Result<(), Error> {
    let Some(identity) = identity else {
        ctx.data().check_tx.send(CheckRequest::CheckAll).await?;
        ctx.say("Checking every tracked player for bans.").await?;
        return Ok(());
    };

    let Ok(identity) = extract_argument(&identity) else {
        ctx.say(USER_NOT_FOUND).await?;
        return Ok(());
    };

    ctx.defer().await?;
    match ctx
        .data()
        .checker
        .check_identity(&identity, Registration::TrackedOnly)
        .await
    {
        Ok(outcome) => {
            ctx.say(ban_status_reply(&outcome.player.name, outcome.is_banned()))
                .await?;
        }
        Err(e) if e.is_not_found() => {
            ctx.say(USER_NOT_FOUND).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Start tracking a Steam profile in this server
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn add(
    ctx: Context<'_>,
    #[rest]
    #[description = "Steam ID, vanity name or profile link"]
    identity: String,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let Ok(identity) = extract_argument(&identity) else {
        ctx.say(USER_NOT_FOUND).await?;
        return Ok(());
    };

    ctx.defer().await?;
    match ctx
        .data()
        .checker
        .check_identity(&identity, Registration::Register(vec![guild_id]))
        .await
    {
        Ok(outcome) => {
            ctx.say(format!(
                "Added {} to the ban list. {}",
                outcome.player.name,
                ban_status_reply(&outcome.player.name, outcome.is_banned())
            ))
            .await?;
        }
        Err(e) if e.is_not_found() => {
            ctx.say(USER_NOT_FOUND).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Stop tracking a Steam profile in this server
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[rest]
    #[description = "Steam ID, vanity name or profile link"]
    identity: String,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let Ok(identity) = extract_argument(&identity) else {
        ctx.say(USER_NOT_FOUND).await?;
        return Ok(());
    };

    match ctx.data().checker.remove_identity(&identity, guild_id).await {
        Ok(Some(user)) => {
            ctx.say(format!("Removed {} from the ban list.", user.name))
                .await?;
        }
        Ok(None) => {
            ctx.say(USER_NOT_FOUND).await?;
        }
        Err(e) if e.is_not_found() => {
            ctx.say(USER_NOT_FOUND).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Set the channel that is scanned for links and receives ban notices
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn channel(
    ctx: Context<'_>,
    #[description = "Channel to watch"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let Some(channel) = channel else {
        ctx.say(CHANNEL_REQUIRED).await?;
        return Ok(());
    };

    ctx.data()
        .groups
        .configure(guild_id, GroupSetting::NotifyChannel(Some(channel.id.get())))
        .await?;
    info!(
        target: COMMAND_TARGET,
        guild_id,
        channel_id = channel.id.get(),
        "Ban channel changed"
    );
    ctx.say(format!("Ban channel is now {}", channel.name)).await?;
    Ok(())
}

/// Change the command character for this server
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn command(
    ctx: Context<'_>,
    #[description = "New command character"] character: String,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let prefix = match parse_prefix(&character) {
        Ok(prefix) => prefix,
        Err(reply) => {
            ctx.say(reply).await?;
            return Ok(());
        }
    };

    ctx.data()
        .groups
        .configure(guild_id, GroupSetting::CommandPrefix(prefix))
        .await?;
    ctx.say(format!("Command character is now {prefix}")).await?;
    Ok(())
}

/// Show how many tracked players have been banned
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn stats(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let stats = ctx.data().store().stats(guild_id).await?;
    ctx.say(stats_message(stats)).await?;
    Ok(())
}

/// List tracked players, or only the banned ones with `bans`
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn list(
    ctx: Context<'_>,
    #[description = "\"bans\" to only list banned players"] filter: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let banned_only = filter.is_some_and(|filter| filter.trim().eq_ignore_ascii_case("bans"));

    let users = ctx
        .data()
        .store()
        .group_users(guild_id, banned_only)
        .await?;
    if users.is_empty() {
        let reply = if banned_only {
            "No tracked players have been banned."
        } else {
            "No players are being tracked."
        };
        ctx.say(reply).await?;
        return Ok(());
    }

    for chunk in chunk_lines(&user_lines(&users, Utc::now()), MESSAGE_LIMIT) {
        ctx.say(chunk).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_definitions() {
        let commands = all();
        let names: Vec<&str> = commands.iter().map(|cmd| cmd.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["check", "add", "remove", "channel", "command", "stats", "list"]
        );
        for cmd in &commands {
            assert!(cmd.guild_only, "{} should be guild only", cmd.name);
            assert!(cmd.prefix_action.is_some());
            assert!(cmd.create_as_slash_command().is_some());
        }
    }

    #[test]
    fn test_ban_status_reply() {
        assert_eq!(ban_status_reply("gaben", true), "gaben has been banned!");
        assert_eq!(ban_status_reply("gaben", false), "gaben has *not* been banned!");
    }

    #[test]
    fn test_parse_prefix() {
        assert_eq!(parse_prefix("$"), Ok('$'));
        assert_eq!(parse_prefix(" % "), Ok('%'));
        assert_eq!(parse_prefix("!!"), Err(PREFIX_LENGTH));
        assert_eq!(parse_prefix(""), Err(PREFIX_LENGTH));
    }
}
