use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::bootstrap::Enrollment;
use crate::directory::Directory;
use crate::discord::{
    ButtonPress, ChannelMessage, CommunityPlatform, MemberUpdate, OutgoingMessage, PlatformEvent,
};
use crate::notifier::{ChannelSettings, Notifier, BOOTSTRAP_BUTTON_ID};
use crate::report;
use crate::sync::{should_trigger, SyncError, SyncRequest, SyncTrigger, Syncer};
use crate::team_sync::TeamSync;

pub const CROSS_MARK: &str = "\u{274c}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    DirectorySync,
    GrafanaSync,
}

/// Parse a bot command from message text. The text must start with one of
/// `prefixes` or a mention of the bot.
pub fn parse_command(content: &str, prefixes: &[String], bot_user_id: u64) -> Option<Command> {
    let mentions = [format!("<@{}>", bot_user_id), format!("<@!{}>", bot_user_id)];
    let rest = prefixes
        .iter()
        .map(String::as_str)
        .chain(mentions.iter().map(String::as_str))
        .find_map(|prefix| content.strip_prefix(prefix))?;

    let words: Vec<&str> = rest.split_whitespace().collect();
    match words.as_slice() {
        ["directory" | "ldap", "sync"] => Some(Command::DirectorySync),
        ["grafana_ldap", "sync"] => Some(Command::GrafanaSync),
        _ => None,
    }
}

/// Everything that only exists while the directory subsystem is enabled.
pub struct DirectoryServices {
    pub directory: Arc<dyn Directory>,
    pub syncer: Arc<Syncer>,
    pub trigger: SyncTrigger,
    pub enrollment: Arc<Enrollment>,
    pub notifier: Notifier,
    pub channel: ChannelSettings,
    pub team_sync: Option<Arc<TeamSync>>,
}

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub guild_id: u64,
    pub devops_role_id: u64,
    pub prefixes: Vec<String>,
    pub bot_user_id: u64,
}

pub struct Handler {
    platform: Arc<dyn CommunityPlatform>,
    settings: HandlerSettings,
    services: Option<DirectoryServices>,
}

impl Handler {
    pub fn new(
        platform: Arc<dyn CommunityPlatform>,
        settings: HandlerSettings,
        services: Option<DirectoryServices>,
    ) -> Self {
        Self {
            platform,
            settings,
            services,
        }
    }

    #[instrument(skip_all)]
    pub async fn handle_event(&self, event: PlatformEvent) -> Result<()> {
        match event {
            PlatformEvent::Ready { username, .. } => {
                info!(user = %username, "gateway ready");
                if let Some(services) = &self.services {
                    services
                        .notifier
                        .ensure_bootstrap_channel(services.directory.as_ref(), &services.channel)
                        .await?;
                }
                Ok(())
            }
            PlatformEvent::MemberUpdate(update) => {
                self.handle_member_update(update).await;
                Ok(())
            }
            PlatformEvent::Message(msg) => self.handle_message(&msg).await,
            PlatformEvent::ButtonPress(press) => self.handle_button(&press).await,
        }
    }

    async fn handle_member_update(&self, update: MemberUpdate) {
        let Some(services) = &self.services else {
            return;
        };
        if update.guild_id != self.settings.guild_id {
            return;
        }
        let member = update.member;
        let gating = services.syncer.settings().gating_role_id;
        let before = services
            .syncer
            .roster()
            .update(member.id, member.roles.clone())
            .await;
        if should_trigger(before.as_ref(), &member.roles, gating) {
            info!(member_id = member.id, "gated roles changed, requesting sync");
            services.trigger.request(SyncRequest::RoleChange);
        }
    }

    async fn handle_message(&self, msg: &ChannelMessage) -> Result<()> {
        if msg.author_bot || msg.guild_id != Some(self.settings.guild_id) {
            return Ok(());
        }
        let Some(command) =
            parse_command(&msg.content, &self.settings.prefixes, self.settings.bot_user_id)
        else {
            return Ok(());
        };
        if !msg.author_roles.contains(&self.settings.devops_role_id) {
            warn!(member_id = msg.author_id, ?command, "unauthorised command");
            self.react_error(msg).await;
            return Ok(());
        }

        info!(member_id = msg.author_id, ?command, "running command");
        match self.run_command(command).await {
            Ok(reply) => {
                for chunk in report::split_message(&reply, report::MESSAGE_LIMIT) {
                    self.platform
                        .send_message(msg.channel_id, &OutgoingMessage::reply(chunk, msg.id))
                        .await?;
                }
            }
            Err(err) => {
                warn!(?err, ?command, "command failed");
                let reply = OutgoingMessage::reply(report::command_error(&err), msg.id);
                self.platform.send_message(msg.channel_id, &reply).await?;
                self.react_error(msg).await;
            }
        }
        Ok(())
    }

    async fn run_command(&self, command: Command) -> Result<String> {
        let services = self.services.as_ref().ok_or(SyncError::Disabled)?;
        match command {
            Command::DirectorySync => {
                let diff = services.syncer.snapshot().await?;
                Ok(report::diff_overview(&diff))
            }
            Command::GrafanaSync => {
                let team_sync = services
                    .team_sync
                    .as_ref()
                    .ok_or_else(|| anyhow!("grafana team sync is not configured"))?;
                let figures = team_sync.run().await?;
                Ok(report::team_sync_summary(&figures))
            }
        }
    }

    /// Enrollment runs several directory calls, so the press is acknowledged
    /// first and the credentials are filled in afterwards.
    async fn handle_button(&self, press: &ButtonPress) -> Result<()> {
        if press.custom_id != BOOTSTRAP_BUTTON_ID {
            return Ok(());
        }
        let Some(member) = &press.member else {
            return Ok(());
        };
        self.platform.defer_ephemeral(press).await?;

        let content = match &self.services {
            Some(services) => services.enrollment.respond(member).await,
            None => report::ENROLLMENT_DISABLED.to_string(),
        };
        self.platform.edit_ephemeral(press, &content).await?;
        Ok(())
    }

    async fn react_error(&self, msg: &ChannelMessage) {
        if let Err(err) = self
            .platform
            .add_reaction(msg.channel_id, msg.id, CROSS_MARK)
            .await
        {
            warn!(?err, "failed to add reaction");
        }
    }
}
