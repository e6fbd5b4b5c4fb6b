#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use arthur::directory::{Directory, DirectoryError};
use arthur::discord::{
    ButtonPress, ChannelMessage, CommunityPlatform, OutgoingMessage, Permissions, PlatformError,
};
use arthur::model::{CommunityMember, DirectoryUser, GroupMapping};

pub const BOT_ID: u64 = 1;
pub const GUILD_ID: u64 = 10;
pub const GATE: u64 = 100;
pub const DEVOPS_ROLE: u64 = 101;
pub const MODS_ROLE: u64 = 102;
pub const BOOTSTRAP_CHANNEL: u64 = 500;
pub const DEVOPS_CHANNEL: u64 = 501;

pub fn mapping() -> GroupMapping {
    GroupMapping::new(BTreeMap::from([
        ("devops".to_string(), DEVOPS_ROLE),
        ("moderators".to_string(), MODS_ROLE),
    ]))
}

pub fn member(id: u64, name: &str, roles: &[u64]) -> CommunityMember {
    CommunityMember {
        id,
        name: name.into(),
        display_name: name.to_uppercase(),
        roles: roles.iter().copied().collect(),
        bot: false,
    }
}

pub fn account(uid: &str, member_id: Option<u64>, groups: &[&str]) -> DirectoryUser {
    DirectoryUser {
        uid: uid.into(),
        employee_number: member_id.map(|id| id.to_string()),
        display_name: None,
        groups: groups.iter().map(|g| g.to_string()).collect(),
    }
}

pub fn groups(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|g| g.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    Create {
        uid: String,
        groups: BTreeSet<String>,
        key: String,
    },
    Deactivate(String),
    SetGroups(String, BTreeSet<String>),
    Reset(String),
}

#[derive(Clone, Default)]
pub struct RecordingDirectory {
    pub users: Arc<Mutex<Vec<DirectoryUser>>>,
    pub calls: Arc<Mutex<Vec<DirectoryCall>>>,
    /// Uids whose mutations fail.
    pub failing: Arc<Mutex<HashSet<String>>>,
    /// Uids whose mutations never complete.
    pub hanging: Arc<Mutex<HashSet<String>>>,
    pub unavailable: Arc<Mutex<bool>>,
    pub group_members: Arc<Mutex<HashMap<String, BTreeSet<String>>>>,
}

impl RecordingDirectory {
    pub fn with_users(users: Vec<DirectoryUser>) -> Self {
        Self {
            users: Arc::new(Mutex::new(users)),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<DirectoryCall> {
        self.calls.lock().await.clone()
    }

    pub async fn fail_for(&self, uid: &str) {
        self.failing.lock().await.insert(uid.to_string());
    }

    pub async fn hang_for(&self, uid: &str) {
        self.hanging.lock().await.insert(uid.to_string());
    }

    async fn mutate(&self, uid: &str, call: DirectoryCall) -> Result<(), DirectoryError> {
        if self.hanging.lock().await.contains(uid) {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().await.contains(uid) {
            return Err(DirectoryError::Unavailable(format!("write to {} failed", uid)));
        }
        self.calls.lock().await.push(call);
        Ok(())
    }
}

#[async_trait]
impl Directory for RecordingDirectory {
    async fn find_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        if *self.unavailable.lock().await {
            return Err(DirectoryError::Unavailable("connection refused".into()));
        }
        Ok(self.users.lock().await.clone())
    }

    async fn find_by_correlation_key(
        &self,
        key: &str,
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        Ok(self
            .users
            .lock()
            .await
            .iter()
            .find(|u| u.employee_number.as_deref() == Some(key))
            .cloned())
    }

    async fn create_account(
        &self,
        uid: &str,
        _display_name: &str,
        groups: &BTreeSet<String>,
        correlation_key: &str,
    ) -> Result<String, DirectoryError> {
        if self.users.lock().await.iter().any(|u| u.uid == uid) {
            return Err(DirectoryError::AlreadyExists(uid.to_string()));
        }
        self.mutate(
            uid,
            DirectoryCall::Create {
                uid: uid.to_string(),
                groups: groups.clone(),
                key: correlation_key.to_string(),
            },
        )
        .await?;
        self.users.lock().await.push(DirectoryUser {
            uid: uid.to_string(),
            employee_number: Some(correlation_key.to_string()),
            display_name: None,
            groups: groups.clone(),
        });
        Ok("created-pw".into())
    }

    async fn deactivate_account(&self, uid: &str) -> Result<(), DirectoryError> {
        self.mutate(uid, DirectoryCall::Deactivate(uid.to_string())).await
    }

    async fn set_groups(&self, uid: &str, groups: &BTreeSet<String>) -> Result<(), DirectoryError> {
        self.mutate(uid, DirectoryCall::SetGroups(uid.to_string(), groups.clone()))
            .await?;
        if let Some(user) = self.users.lock().await.iter_mut().find(|u| u.uid == uid) {
            user.groups = groups.clone();
        }
        Ok(())
    }

    async fn force_password_reset(&self, uid: &str) -> Result<String, DirectoryError> {
        self.mutate(uid, DirectoryCall::Reset(uid.to_string())).await?;
        Ok("reset-pw".into())
    }

    async fn group_members(&self, group: &str) -> Result<BTreeSet<String>, DirectoryError> {
        Ok(self
            .group_members
            .lock()
            .await
            .get(group)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel_id: u64,
    pub message: OutgoingMessage,
}

impl SentMessage {
    pub fn content(&self) -> &str {
        &self.message.content
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionCall {
    Defer(u64),
    Edit(u64, String),
}

#[derive(Clone, Default)]
pub struct RecordingPlatform {
    pub members: Arc<Mutex<Vec<CommunityMember>>>,
    pub history: Arc<Mutex<Vec<ChannelMessage>>>,
    pub sent: Arc<Mutex<Vec<SentMessage>>>,
    pub deleted: Arc<Mutex<Vec<u64>>>,
    pub edited: Arc<Mutex<Vec<u64>>>,
    pub topics: Arc<Mutex<Vec<String>>>,
    pub overwrites: Arc<Mutex<Vec<(u64, Permissions, Permissions)>>>,
    pub reactions: Arc<Mutex<Vec<(u64, u64, String)>>>,
    pub interactions: Arc<Mutex<Vec<InteractionCall>>>,
    pub roster_unavailable: Arc<Mutex<bool>>,
}

impl RecordingPlatform {
    pub fn with_members(members: Vec<CommunityMember>) -> Self {
        Self {
            members: Arc::new(Mutex::new(members)),
            ..Default::default()
        }
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, channel_id: u64) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .map(|m| m.content().to_string())
            .collect()
    }

    pub async fn push_history(&self, author: u64, content: &str) -> u64 {
        let mut history = self.history.lock().await;
        let id = next_id(&history);
        history.push(message(id, BOOTSTRAP_CHANNEL, author, content));
        id
    }
}

fn next_id(history: &[ChannelMessage]) -> u64 {
    history.iter().map(|m| m.id).max().map_or(1000, |id| id + 1)
}

pub fn message(id: u64, channel_id: u64, author: u64, content: &str) -> ChannelMessage {
    ChannelMessage {
        id,
        channel_id,
        guild_id: Some(GUILD_ID),
        author_id: author,
        author_bot: author == BOT_ID,
        author_roles: Vec::new(),
        content: content.into(),
        mentions: Vec::new(),
    }
}

#[async_trait]
impl CommunityPlatform for RecordingPlatform {
    async fn list_members(&self, _guild_id: u64) -> Result<Vec<CommunityMember>, PlatformError> {
        if *self.roster_unavailable.lock().await {
            return Err(PlatformError::Discord(serenity::Error::Other(
                "roster unavailable",
            )));
        }
        Ok(self.members.lock().await.clone())
    }

    async fn channel_history(
        &self,
        channel_id: u64,
    ) -> Result<Vec<ChannelMessage>, PlatformError> {
        Ok(self
            .history
            .lock()
            .await
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        channel_id: u64,
        message: &OutgoingMessage,
    ) -> Result<u64, PlatformError> {
        self.sent.lock().await.push(SentMessage {
            channel_id,
            message: message.clone(),
        });
        // Posted messages become part of the channel history.
        let mut history = self.history.lock().await;
        let id = next_id(&history);
        history.push(self::message(id, channel_id, BOT_ID, &message.content));
        Ok(id)
    }

    async fn edit_message(
        &self,
        _channel_id: u64,
        message_id: u64,
        _message: &OutgoingMessage,
    ) -> Result<(), PlatformError> {
        self.edited.lock().await.push(message_id);
        Ok(())
    }

    async fn delete_message(&self, _channel_id: u64, message_id: u64) -> Result<(), PlatformError> {
        self.deleted.lock().await.push(message_id);
        self.history.lock().await.retain(|m| m.id != message_id);
        Ok(())
    }

    async fn set_channel_topic(&self, _channel_id: u64, topic: &str) -> Result<(), PlatformError> {
        self.topics.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn set_role_overwrite(
        &self,
        _channel_id: u64,
        role_id: u64,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<(), PlatformError> {
        self.overwrites.lock().await.push((role_id, allow, deny));
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        self.reactions
            .lock()
            .await
            .push((channel_id, message_id, emoji.to_string()));
        Ok(())
    }

    async fn defer_ephemeral(&self, press: &ButtonPress) -> Result<(), PlatformError> {
        self.interactions
            .lock()
            .await
            .push(InteractionCall::Defer(press.interaction_id));
        Ok(())
    }

    async fn edit_ephemeral(
        &self,
        press: &ButtonPress,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.interactions
            .lock()
            .await
            .push(InteractionCall::Edit(press.interaction_id, content.to_string()));
        Ok(())
    }
}

pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);
