use crate::chat::ChatMessage;
use crate::ingest::IngestOutcome;
use crate::{Data, EVENT_TARGET};
use poise::serenity_prelude::{
    self as serenity, ActivityData, Context, EventHandler, Guild, GuildId, Message, Ready,
    UnavailableGuild,
};
use tracing::{debug, error, info, warn};

/// Presence shown while the bot is connected
pub const ACTIVITY: &str = "CSGO for cheaters";

pub struct Handler;

/// Shared state stored in serenity's data map by `main`
async fn shared_data(ctx: &Context) -> Option<Data> {
    let data = ctx.data.read().await;
    let shared = data.get::<Data>().cloned();
    if shared.is_none() {
        error!(target: EVENT_TARGET, "Bot data missing from client data map");
    }
    shared
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(
            target: EVENT_TARGET,
            user_id = ready.user.id.get(),
            "Connected as {user_name}, shard {shard_id}"
        );

        ctx.set_activity(Some(ActivityData::watching(ACTIVITY)));

        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        let guild_ids: Vec<u64> = ready.guilds.iter().map(|guild| guild.id.get()).collect();

        // Replaying history can take a while; keep the gateway loop free
        tokio::spawn(async move {
            match data.ingestor.backfill(&guild_ids).await {
                Ok(summary) => info!(
                    target: EVENT_TARGET,
                    guilds = guild_ids.len(),
                    processed = summary.processed,
                    escalated = summary.escalated,
                    errors = summary.errors,
                    "Finished replaying missed messages"
                ),
                Err(e) => error!(target: EVENT_TARGET, "Failed to replay missed messages: {e}"),
            }
        });
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, is_new: Option<bool>) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        match data.groups.get(guild.id.get()).await {
            Ok(_) if is_new == Some(true) => {
                info!(
                    target: EVENT_TARGET,
                    guild_id = guild.id.get(),
                    name = %guild.name,
                    "Joined guild"
                );
            }
            Ok(_) => {}
            Err(e) => error!(
                target: EVENT_TARGET,
                guild_id = guild.id.get(),
                "Failed to load guild settings: {e}"
            ),
        }
    }

    async fn guild_delete(&self, ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // Outages also arrive here; only forget guilds we actually left
        if incomplete.unavailable {
            return;
        }
        if let Some(data) = shared_data(&ctx).await {
            data.groups.invalidate(incomplete.id.get());
            info!(target: EVENT_TARGET, guild_id = incomplete.id.get(), "Left guild");
        }
    }

    async fn message(&self, ctx: Context, message: Message) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        let self_id = ctx.cache.current_user().id;
        let chat_message = ChatMessage::from_serenity(&message, self_id);

        match data.ingestor.handle_message(&chat_message).await {
            Ok(IngestOutcome::Scanned {
                identities,
                summary,
            }) => debug!(
                target: EVENT_TARGET,
                message_id = chat_message.id,
                found = identities.len(),
                errors = summary.errors,
                "Scanned message"
            ),
            Ok(IngestOutcome::Ignored(_)) => {}
            Err(e) => error!(
                target: EVENT_TARGET,
                message_id = chat_message.id,
                "Failed to process message: {e}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_activity() {
        let activity = ActivityData::watching(ACTIVITY);
        assert_eq!(activity.name, "CSGO for cheaters");
        assert_eq!(activity.kind, serenity::ActivityType::Watching);
    }
}
