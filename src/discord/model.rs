//! Bot-side views of the Discord payloads the handlers and notifier read.
use serenity::model::application::{ComponentInteraction, ComponentInteractionDataKind};
use serenity::model::channel::Message;
use serenity::model::event::GuildMemberUpdateEvent;
use serenity::model::guild::Member;
use serenity::model::id::RoleId;
use serenity::model::user::User;

use crate::model::CommunityMember;

/// A channel message, reduced to what command parsing and the history scan need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author_id: u64,
    pub author_bot: bool,
    /// Empty for messages fetched over REST and outside guilds.
    pub author_roles: Vec<u64>,
    pub content: String,
    pub mentions: Vec<u64>,
}

impl From<&Message> for ChannelMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.get(),
            channel_id: msg.channel_id.get(),
            guild_id: msg.guild_id.map(|g| g.get()),
            author_id: msg.author.id.get(),
            author_bot: msg.author.bot,
            author_roles: msg
                .member
                .as_ref()
                .map(|m| role_ids(&m.roles))
                .unwrap_or_default(),
            content: msg.content.clone(),
            mentions: msg.mentions.iter().map(|u| u.id.get()).collect(),
        }
    }
}

fn role_ids(roles: &[RoleId]) -> Vec<u64> {
    roles.iter().map(|r| r.get()).collect()
}

/// Guild nickname, then global display name, then account name.
pub fn display_name(nick: Option<&str>, global_name: Option<&str>, username: &str) -> String {
    nick.or(global_name).unwrap_or(username).to_string()
}

pub fn community_member(user: &User, nick: Option<&str>, roles: &[RoleId]) -> CommunityMember {
    CommunityMember {
        id: user.id.get(),
        name: user.name.clone(),
        display_name: display_name(nick, user.global_name.as_deref(), &user.name),
        roles: roles.iter().map(|r| r.get()).collect(),
        bot: user.bot,
    }
}

impl From<&Member> for CommunityMember {
    fn from(member: &Member) -> Self {
        community_member(&member.user, member.nick.as_deref(), &member.roles)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUpdate {
    pub guild_id: u64,
    pub member: CommunityMember,
}

impl From<&GuildMemberUpdateEvent> for MemberUpdate {
    fn from(event: &GuildMemberUpdateEvent) -> Self {
        Self {
            guild_id: event.guild_id.get(),
            member: community_member(&event.user, event.nick.as_deref(), &event.roles),
        }
    }
}

/// A press of a message button. `token` answers the interaction.
#[derive(Clone, PartialEq, Eq)]
pub struct ButtonPress {
    pub interaction_id: u64,
    pub token: String,
    pub custom_id: String,
    pub guild_id: Option<u64>,
    pub member: Option<CommunityMember>,
}

impl std::fmt::Debug for ButtonPress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ButtonPress")
            .field("interaction_id", &self.interaction_id)
            .field("custom_id", &self.custom_id)
            .field("guild_id", &self.guild_id)
            .finish_non_exhaustive()
    }
}

impl ButtonPress {
    /// Other component kinds (select menus) are not buttons.
    pub fn from_component(interaction: &ComponentInteraction) -> Option<Self> {
        if !matches!(interaction.data.kind, ComponentInteractionDataKind::Button) {
            return None;
        }
        Some(Self {
            interaction_id: interaction.id.get(),
            token: interaction.token.clone(),
            custom_id: interaction.data.custom_id.clone(),
            guild_id: interaction.guild_id.map(|g| g.get()),
            member: interaction.member.as_ref().map(CommunityMember::from),
        })
    }
}

/// Gateway events the bot reacts to.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    Ready { user_id: u64, username: String },
    MemberUpdate(MemberUpdate),
    Message(Box<ChannelMessage>),
    ButtonPress(Box<ButtonPress>),
}
