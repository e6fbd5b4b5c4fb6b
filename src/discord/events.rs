//! Bridge from the serenity gateway client to the bot's event queue.
//!
//! serenity owns the session (identify, heartbeats, reconnects). Events the
//! bot cares about are converted and queued for the handler loop in `main`.
use async_trait::async_trait;
use serenity::client::{Context, EventHandler};
use serenity::model::application::Interaction;
use serenity::model::channel::Message;
use serenity::model::event::GuildMemberUpdateEvent;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::guild::Member;
use tokio::sync::mpsc;
use tracing::warn;

use super::model::{ButtonPress, ChannelMessage, MemberUpdate, PlatformEvent};

/// Guilds, member updates (privileged) and message content (privileged).
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
}

pub struct EventForwarder {
    events: mpsc::Sender<PlatformEvent>,
}

impl EventForwarder {
    pub fn new(events: mpsc::Sender<PlatformEvent>) -> Self {
        Self { events }
    }

    async fn forward(&self, event: PlatformEvent) {
        if self.events.send(event).await.is_err() {
            warn!("event queue closed, dropping gateway event");
        }
    }
}

#[async_trait]
impl EventHandler for EventForwarder {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.forward(PlatformEvent::Ready {
            user_id: ready.user.id.get(),
            username: ready.user.name.clone(),
        })
        .await;
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let msg = ChannelMessage::from(&msg);
        self.forward(PlatformEvent::Message(Box::new(msg))).await;
    }

    async fn guild_member_update(
        &self,
        _ctx: Context,
        _old: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        self.forward(PlatformEvent::MemberUpdate(MemberUpdate::from(&event)))
            .await;
    }

    async fn interaction_create(&self, _ctx: Context, interaction: Interaction) {
        let Interaction::Component(component) = &interaction else {
            return;
        };
        if let Some(press) = ButtonPress::from_component(component) {
            self.forward(PlatformEvent::ButtonPress(Box::new(press))).await;
        }
    }
}
