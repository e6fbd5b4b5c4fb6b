//! Enrollment prompts in the bootstrap channel.
//!
//! The channel history is the only record of who has been prompted: a member
//! counts as notified when a bot-authored message (other than the bootstrap
//! message itself) mentions them first. History is scanned oldest first.
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::directory::Directory;
use crate::discord::{
    ChannelMessage, CommunityPlatform, OutgoingMessage, Permissions, PlatformError,
};
use crate::model::{CommunityMember, GroupMapping};
use crate::report;

pub const BOOTSTRAP_BUTTON_ID: &str = "generate_creds";
pub const BOOTSTRAP_BUTTON_LABEL: &str = "Create or Reset Login";

static USER_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?(\d+)>").expect("static mention pattern"));

pub fn is_bootstrap_message(msg: &ChannelMessage, bot_user_id: u64) -> bool {
    msg.author_id == bot_user_id && msg.content.starts_with(report::BOOTSTRAP_HEADER)
}

/// The member a message is addressed to: the first user mention in its text.
pub fn first_mention(msg: &ChannelMessage) -> Option<u64> {
    USER_MENTION
        .captures(&msg.content)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .or_else(|| msg.mentions.first().copied())
}

fn prompt_target(msg: &ChannelMessage, bot_user_id: u64) -> Option<u64> {
    if msg.author_id != bot_user_id || is_bootstrap_message(msg, bot_user_id) {
        return None;
    }
    first_mention(msg)
}

/// Members that already have a prompt standing in `history`.
pub fn notified_members(history: &[ChannelMessage], bot_user_id: u64) -> HashSet<u64> {
    history
        .iter()
        .filter_map(|m| prompt_target(m, bot_user_id))
        .collect()
}

/// Channel permission overwrite for a mapped role.
pub fn role_overwrite(role_id: u64, devops_role_id: u64) -> (Permissions, Permissions) {
    if role_id == devops_role_id {
        (
            Permissions::VIEW_CHANNEL
                | Permissions::SEND_MESSAGES
                | Permissions::MANAGE_CHANNELS
                | Permissions::MANAGE_MESSAGES
                | Permissions::MANAGE_ROLES,
            Permissions::empty(),
        )
    } else {
        (Permissions::VIEW_CHANNEL, Permissions::SEND_MESSAGES)
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub devops_role_id: u64,
    pub devops_channel_id: u64,
    pub login_url: String,
    pub mapping: GroupMapping,
}

#[derive(Clone)]
pub struct Notifier {
    platform: Arc<dyn CommunityPlatform>,
    channel_id: u64,
    bot_user_id: u64,
}

impl Notifier {
    pub fn new(platform: Arc<dyn CommunityPlatform>, channel_id: u64, bot_user_id: u64) -> Self {
        Self {
            platform,
            channel_id,
            bot_user_id,
        }
    }

    pub async fn notified(&self) -> Result<HashSet<u64>, PlatformError> {
        let history = self.platform.channel_history(self.channel_id).await?;
        Ok(notified_members(&history, self.bot_user_id))
    }

    pub async fn prompt(&self, member: &CommunityMember) -> Result<(), PlatformError> {
        let prompt = OutgoingMessage::text(report::eligible_prompt(member));
        self.platform.send_message(self.channel_id, &prompt).await?;
        info!(member_id = member.id, "sent enrollment prompt");
        Ok(())
    }

    /// Delete the first bot message mentioning the member. Returns whether one was found.
    pub async fn retract_prompt(&self, member_id: u64) -> Result<bool, PlatformError> {
        let history = self.platform.channel_history(self.channel_id).await?;
        let Some(prompt) = history
            .iter()
            .find(|m| prompt_target(m, self.bot_user_id) == Some(member_id))
        else {
            return Ok(false);
        };
        self.platform.delete_message(self.channel_id, prompt.id).await?;
        info!(member_id, message_id = prompt.id, "retracted enrollment prompt");
        Ok(true)
    }

    /// Bring the bootstrap channel into its expected state.
    #[instrument(skip_all)]
    pub async fn ensure_bootstrap_channel(
        &self,
        directory: &dyn Directory,
        settings: &ChannelSettings,
    ) -> anyhow::Result<()> {
        let topic = report::bootstrap_topic(settings.devops_channel_id, &settings.login_url);
        self.platform.set_channel_topic(self.channel_id, &topic).await?;

        let history = self.platform.channel_history(self.channel_id).await?;
        let expected = report::bootstrap_message(settings.devops_channel_id);
        let message = OutgoingMessage::with_button(
            expected.clone(),
            BOOTSTRAP_BUTTON_LABEL,
            BOOTSTRAP_BUTTON_ID,
        );

        match history
            .iter()
            .rev()
            .find(|m| is_bootstrap_message(m, self.bot_user_id))
        {
            Some(found) if found.content == expected => info!("bootstrap message up to date"),
            Some(found) => {
                info!(message_id = found.id, "updating bootstrap message");
                self.platform
                    .edit_message(self.channel_id, found.id, &message)
                    .await?;
            }
            None => {
                info!("posting bootstrap message");
                self.platform.send_message(self.channel_id, &message).await?;
            }
        }

        for msg in &history {
            let Some(member_id) = prompt_target(msg, self.bot_user_id) else {
                continue;
            };
            match directory.find_by_correlation_key(&member_id.to_string()).await {
                Ok(Some(_)) => {
                    if let Err(err) = self.platform.delete_message(self.channel_id, msg.id).await {
                        warn!(?err, member_id, "failed to delete stale prompt");
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(?err, member_id, "failed to look up prompted member"),
            }
        }

        for role_id in settings.mapping.role_ids() {
            let (allow, deny) = role_overwrite(role_id, settings.devops_role_id);
            if let Err(err) = self
                .platform
                .set_role_overwrite(self.channel_id, role_id, allow, deny)
                .await
            {
                error!(?err, role_id, "could not set bootstrap channel permissions");
            }
        }
        Ok(())
    }
}
