use async_trait::async_trait;
use serenity::builder::{
    CreateActionRow, CreateAllowedMentions, CreateButton, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, EditChannel, EditInteractionResponse,
    EditMessage, GetMessages,
};
use serenity::http::Http;
use serenity::model::application::ButtonStyle;
use serenity::model::channel::{PermissionOverwrite, PermissionOverwriteType, ReactionType};
use serenity::model::id::{ChannelId, GuildId, InteractionId, MessageId, RoleId, UserId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::model::CommunityMember;

pub mod events;
pub mod model;

pub use model::{ButtonPress, ChannelMessage, MemberUpdate, PlatformEvent};
pub use serenity::model::permissions::Permissions;

const MEMBER_PAGE_SIZE: u64 = 1000;
const MESSAGE_PAGE_SIZE: u8 = 100;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("discord request failed: {0}")]
    Discord(#[from] serenity::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub custom_id: String,
}

/// A message the bot posts. Plain text pings the users it mentions; replies
/// and button messages ping nobody.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    pub reply_to: Option<u64>,
    pub button: Option<Button>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn reply(content: impl Into<String>, reply_to: u64) -> Self {
        Self {
            content: content.into(),
            reply_to: Some(reply_to),
            button: None,
        }
    }

    pub fn with_button(content: impl Into<String>, label: &str, custom_id: &str) -> Self {
        Self {
            content: content.into(),
            reply_to: None,
            button: Some(Button {
                label: label.to_string(),
                custom_id: custom_id.to_string(),
            }),
        }
    }

    fn allowed_mentions(&self) -> CreateAllowedMentions {
        if self.reply_to.is_some() || self.button.is_some() {
            CreateAllowedMentions::new().replied_user(false)
        } else {
            CreateAllowedMentions::new().all_users(true)
        }
    }

    fn components(&self) -> Vec<CreateActionRow> {
        self.button
            .iter()
            .map(|b| {
                CreateActionRow::Buttons(vec![CreateButton::new(b.custom_id.clone())
                    .label(b.label.clone())
                    .style(ButtonStyle::Primary)])
            })
            .collect()
    }
}

pub fn create_message(channel_id: u64, message: &OutgoingMessage) -> CreateMessage {
    let mut builder = CreateMessage::new()
        .content(message.content.clone())
        .allowed_mentions(message.allowed_mentions())
        .components(message.components());
    if let Some(reply_to) = message.reply_to {
        let reference = (ChannelId::new(channel_id), MessageId::new(reply_to));
        builder = builder.reference_message(reference);
    }
    builder
}

pub fn edit_message(message: &OutgoingMessage) -> EditMessage {
    EditMessage::new()
        .content(message.content.clone())
        .allowed_mentions(message.allowed_mentions())
        .components(message.components())
}

/// The parts of Discord the handlers, sync worker and notifier use.
#[async_trait]
pub trait CommunityPlatform: Send + Sync {
    async fn list_members(&self, guild_id: u64) -> Result<Vec<CommunityMember>, PlatformError>;

    /// Full channel history, oldest first.
    async fn channel_history(&self, channel_id: u64)
        -> Result<Vec<ChannelMessage>, PlatformError>;

    /// Post a message and return its id.
    async fn send_message(
        &self,
        channel_id: u64,
        message: &OutgoingMessage,
    ) -> Result<u64, PlatformError>;

    async fn edit_message(
        &self,
        channel_id: u64,
        message_id: u64,
        message: &OutgoingMessage,
    ) -> Result<(), PlatformError>;

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), PlatformError>;

    async fn set_channel_topic(&self, channel_id: u64, topic: &str) -> Result<(), PlatformError>;

    async fn set_role_overwrite(
        &self,
        channel_id: u64,
        role_id: u64,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<(), PlatformError>;

    async fn add_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
    ) -> Result<(), PlatformError>;

    /// Acknowledge a button press with a deferred reply only the presser sees.
    async fn defer_ephemeral(&self, press: &ButtonPress) -> Result<(), PlatformError>;

    /// Fill in the reply deferred by `defer_ephemeral`.
    async fn edit_ephemeral(&self, press: &ButtonPress, content: &str)
        -> Result<(), PlatformError>;
}

#[derive(Clone)]
pub struct DiscordClient {
    http: Arc<Http>,
}

impl fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordClient").finish_non_exhaustive()
    }
}

impl DiscordClient {
    /// Share the REST client of a gateway `Client`.
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    /// Standalone REST client for tools that never open a gateway session.
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(Arc::new(Http::new(&cfg.discord.token)))
    }

    fn api(&self) -> &Http {
        &self.http
    }

    pub async fn current_user_id(&self) -> Result<u64, PlatformError> {
        Ok(self.http.get_current_user().await?.id.get())
    }
}

#[async_trait]
impl CommunityPlatform for DiscordClient {
    #[instrument(skip(self))]
    async fn list_members(&self, guild_id: u64) -> Result<Vec<CommunityMember>, PlatformError> {
        let guild = GuildId::new(guild_id);
        let mut members = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let page = guild
                .members(self.api(), Some(MEMBER_PAGE_SIZE), after)
                .await?;
            let page_len = page.len();
            after = page.iter().map(|m| m.user.id).max().or(after);
            members.extend(page.iter().map(CommunityMember::from));
            if page_len < MEMBER_PAGE_SIZE as usize {
                break;
            }
        }
        debug!(count = members.len(), "fetched guild members");
        Ok(members)
    }

    #[instrument(skip(self))]
    async fn channel_history(
        &self,
        channel_id: u64,
    ) -> Result<Vec<ChannelMessage>, PlatformError> {
        let channel = ChannelId::new(channel_id);
        let mut messages = Vec::new();
        let mut before: Option<MessageId> = None;
        loop {
            let mut request = GetMessages::new().limit(MESSAGE_PAGE_SIZE);
            if let Some(before) = before {
                request = request.before(before);
            }
            let page = channel.messages(self.api(), request).await?;
            let page_len = page.len();
            before = page.iter().map(|m| m.id).min().or(before);
            messages.extend(page.iter().map(ChannelMessage::from));
            if page_len < MESSAGE_PAGE_SIZE as usize {
                break;
            }
        }
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    async fn send_message(
        &self,
        channel_id: u64,
        message: &OutgoingMessage,
    ) -> Result<u64, PlatformError> {
        let sent = ChannelId::new(channel_id)
            .send_message(self.api(), create_message(channel_id, message))
            .await?;
        Ok(sent.id.get())
    }

    async fn edit_message(
        &self,
        channel_id: u64,
        message_id: u64,
        message: &OutgoingMessage,
    ) -> Result<(), PlatformError> {
        ChannelId::new(channel_id)
            .edit_message(self.api(), MessageId::new(message_id), edit_message(message))
            .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), PlatformError> {
        ChannelId::new(channel_id)
            .delete_message(self.api(), MessageId::new(message_id))
            .await?;
        Ok(())
    }

    async fn set_channel_topic(&self, channel_id: u64, topic: &str) -> Result<(), PlatformError> {
        ChannelId::new(channel_id)
            .edit(self.api(), EditChannel::new().topic(topic))
            .await?;
        Ok(())
    }

    async fn set_role_overwrite(
        &self,
        channel_id: u64,
        role_id: u64,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<(), PlatformError> {
        let overwrite = PermissionOverwrite {
            allow,
            deny,
            kind: PermissionOverwriteType::Role(RoleId::new(role_id)),
        };
        ChannelId::new(channel_id)
            .create_permission(self.api(), overwrite)
            .await?;
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        ChannelId::new(channel_id)
            .create_reaction(
                self.api(),
                MessageId::new(message_id),
                ReactionType::Unicode(emoji.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn defer_ephemeral(&self, press: &ButtonPress) -> Result<(), PlatformError> {
        let deferred = CreateInteractionResponseMessage::new().ephemeral(true);
        let response = CreateInteractionResponse::Defer(deferred);
        self.http
            .create_interaction_response(
                InteractionId::new(press.interaction_id),
                &press.token,
                &response,
                Vec::new(),
            )
            .await?;
        Ok(())
    }

    async fn edit_ephemeral(
        &self,
        press: &ButtonPress,
        content: &str,
    ) -> Result<(), PlatformError> {
        let edit = EditInteractionResponse::new().content(content);
        self.http
            .edit_original_interaction_response(&press.token, &edit, Vec::new())
            .await?;
        Ok(())
    }
}
