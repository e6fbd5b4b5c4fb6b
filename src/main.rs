use anyhow::{Context, Result};
use clap::Parser;
use serenity::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use arthur::bootstrap::{Enrollment, EnrollmentSettings};
use arthur::config::{self, Config};
use arthur::directory::{Directory, ManagedDirectory};
use arthur::discord::events::{intents, EventForwarder};
use arthur::discord::{CommunityPlatform, DiscordClient};
use arthur::grafana::GrafanaClient;
use arthur::handlers::{DirectoryServices, Handler, HandlerSettings};
use arthur::notifier::{ChannelSettings, Notifier};
use arthur::sync::{self, SyncSettings, SyncTrigger, Syncer};
use arthur::team_sync::{self, TeamSync};

const EVENT_QUEUE: usize = 64;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE);
    let mut client = Client::builder(&cfg.discord.token, intents())
        .event_handler(EventForwarder::new(event_tx))
        .await
        .context("failed to build discord client")?;

    let discord = Arc::new(DiscordClient::new(client.http.clone()));
    let bot_user_id = discord
        .current_user_id()
        .await
        .context("failed to fetch bot user")?;
    info!(id = bot_user_id, "authenticated with discord");

    let services = if cfg.directory.enabled {
        Some(start_directory_services(&cfg, discord.clone(), bot_user_id)?)
    } else {
        warn!("directory subsystem disabled");
        None
    };

    let handler = Arc::new(Handler::new(
        discord,
        HandlerSettings {
            guild_id: cfg.discord.guild_id,
            devops_role_id: cfg.discord.devops_role_id,
            prefixes: cfg.app.prefixes.clone(),
            bot_user_id,
        },
        services,
    ));

    // serenity reconnects on its own; start() only returns on a fatal error.
    tokio::spawn(async move {
        if let Err(err) = client.start().await {
            error!(?err, "discord client stopped");
        }
    });

    info!("starting discord bot");
    while let Some(event) = event_rx.recv().await {
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(err) = handler.handle_event(event).await {
                error!(?err, "failed to handle event");
            }
        });
    }

    Ok(())
}

/// Build the directory clients and spawn the sync worker and timers.
fn start_directory_services(
    cfg: &Config,
    discord: Arc<DiscordClient>,
    bot_user_id: u64,
) -> Result<DirectoryServices> {
    let directory: Arc<dyn Directory> = Arc::new(ManagedDirectory::from_config(cfg)?);
    let platform: Arc<dyn CommunityPlatform> = discord;
    let mapping = cfg.group_mapping();

    let notifier = Notifier::new(
        platform.clone(),
        cfg.directory.bootstrap_channel_id,
        bot_user_id,
    );
    let syncer = Arc::new(Syncer::new(
        directory.clone(),
        platform,
        notifier.clone(),
        SyncSettings {
            guild_id: cfg.discord.guild_id,
            gating_role_id: cfg.directory.gating_role_id,
            devops_channel_id: cfg.discord.devops_channel_id,
            notifications_enabled: cfg.directory.notifications_enabled,
            mapping: mapping.clone(),
            call_timeout: cfg.request_timeout(),
        },
    ));

    // Spawn sync worker (single consumer) and its timer
    let (trigger, requests) = SyncTrigger::channel();
    tokio::spawn(sync::run_worker(syncer.clone(), requests));
    tokio::spawn(sync::run_timer(trigger.clone(), cfg.sync_interval()));

    let enrollment = Arc::new(Enrollment::new(
        directory.clone(),
        notifier.clone(),
        EnrollmentSettings {
            gating_role_id: cfg.directory.gating_role_id,
            mapping: mapping.clone(),
            mail_domain: cfg.directory.mail_domain.clone(),
            login_url: cfg.directory.login_url.clone(),
            call_timeout: cfg.request_timeout(),
        },
    ));

    let team_sync = match &cfg.grafana {
        Some(grafana) => {
            let timeout = cfg.request_timeout();
            let client = GrafanaClient::new(&grafana.url, grafana.token.clone(), timeout)?;
            let team_sync = Arc::new(TeamSync::new(
                Arc::new(client),
                directory.clone(),
                grafana.team_mapping.clone(),
            ));
            let period = std::time::Duration::from_secs(grafana.sync_interval_secs);
            tokio::spawn(team_sync::run_timer(team_sync.clone(), period));
            Some(team_sync)
        }
        None => None,
    };

    Ok(DirectoryServices {
        directory,
        syncer,
        trigger,
        enrollment,
        notifier,
        channel: ChannelSettings {
            devops_role_id: cfg.discord.devops_role_id,
            devops_channel_id: cfg.discord.devops_channel_id,
            login_url: cfg.directory.login_url.clone(),
            mapping,
        },
        team_sync,
    })
}
