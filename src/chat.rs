//! Chat port
//!
//! The checker talks to Discord only through `ChatPort`, so the core never
//! depends on serenity types. `SerenityChat` is the production adapter.

use crate::checker::BanNotice;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use serenity::{
    ChannelId, Colour, CreateEmbed, CreateMessage, GetMessages, Http, Message, MessageId,
    ReactionType,
};
use std::sync::Arc;
use thiserror::Error;

/// Reaction on a scanned message when at least one identity was found
pub const THUMBS_UP_EMOJI: &str = "👍";
/// Reaction on a scanned message when nothing was found
pub const THUMBS_DOWN_EMOJI: &str = "👎";

/// Number of past messages replayed per channel on startup
pub const HISTORY_LIMIT: u8 = 100;

/// Errors raised by the chat platform
#[derive(Debug, Error)]
pub enum ChatError {
    /// Discord API error
    #[error("Discord API error: {0}")]
    Discord(#[from] Box<serenity::Error>),

    /// Message could not be delivered for another reason
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl From<serenity::Error> for ChatError {
    fn from(error: serenity::Error) -> Self {
        Self::Discord(Box::new(error))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Reaction used to mark a scanned message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMark {
    Found,
    NothingFound,
}

impl ScanMark {
    #[must_use]
    pub fn emoji(self) -> &'static str {
        match self {
            Self::Found => THUMBS_UP_EMOJI,
            Self::NothingFound => THUMBS_DOWN_EMOJI,
        }
    }
}

/// Platform-neutral view of a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: u64,
    pub channel_id: u64,
    /// Guild the message was posted in, `None` for direct messages
    pub group_id: Option<u64>,
    pub content: String,
    /// Written by the bot itself
    pub from_self: bool,
    /// The bot already reacted to it
    pub reacted_by_self: bool,
}

impl ChatMessage {
    /// Convert a serenity message, given the bot's own user ID
    #[must_use]
    pub fn from_serenity(message: &Message, self_id: serenity::UserId) -> Self {
        Self {
            id: message.id.get(),
            channel_id: message.channel_id.get(),
            group_id: message.guild_id.map(serenity::GuildId::get),
            content: message.content.clone(),
            from_self: message.author.id == self_id,
            reacted_by_self: message.reactions.iter().any(|reaction| reaction.me),
        }
    }
}

/// Outbound operations the checker needs from the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// Post a ban notice to a channel
    async fn send_notice(&self, channel_id: u64, notice: &BanNotice) -> ChatResult<()>;

    /// Post plain text to a channel
    async fn send_text(&self, channel_id: u64, text: &str) -> ChatResult<()>;

    /// React to a message
    async fn add_reaction(&self, channel_id: u64, message_id: u64, mark: ScanMark)
    -> ChatResult<()>;

    /// Most recent messages of a channel, newest first
    async fn history(&self, channel_id: u64, limit: u8) -> ChatResult<Vec<ChatMessage>>;
}

/// `ChatPort` backed by the Discord HTTP API
pub struct SerenityChat {
    http: Arc<Http>,
    self_id: serenity::UserId,
}

impl SerenityChat {
    #[must_use]
    pub fn new(http: Arc<Http>, self_id: serenity::UserId) -> Self {
        Self { http, self_id }
    }

    /// Embed shown for a ban notice
    #[must_use]
    pub fn notice_embed(notice: &BanNotice) -> CreateEmbed {
        CreateEmbed::new()
            .title(notice.title())
            .description(notice.description())
            .url(notice.profile_url())
            .colour(Colour::RED)
    }
}

#[async_trait]
impl ChatPort for SerenityChat {
    async fn send_notice(&self, channel_id: u64, notice: &BanNotice) -> ChatResult<()> {
        let message = CreateMessage::new().embed(Self::notice_embed(notice));
        ChannelId::new(channel_id)
            .send_message(&*self.http, message)
            .await?;
        Ok(())
    }

    async fn send_text(&self, channel_id: u64, text: &str) -> ChatResult<()> {
        ChannelId::new(channel_id).say(&*self.http, text).await?;
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        mark: ScanMark,
    ) -> ChatResult<()> {
        ChannelId::new(channel_id)
            .create_reaction(
                &*self.http,
                MessageId::new(message_id),
                ReactionType::Unicode(mark.emoji().to_string()),
            )
            .await?;
        Ok(())
    }

    async fn history(&self, channel_id: u64, limit: u8) -> ChatResult<Vec<ChatMessage>> {
        let messages = ChannelId::new(channel_id)
            .messages(&*self.http, GetMessages::new().limit(limit))
            .await?;
        Ok(messages
            .iter()
            .map(|message| ChatMessage::from_serenity(message, self.self_id))
            .collect())
    }
}
