use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use arthur::config;
use arthur::directory::{Directory, ManagedDirectory};
use arthur::discord::{CommunityPlatform, DiscordClient};
use arthur::reconcile::compute_diff;
use arthur::report;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Print the pending directory changes for the guild and exit without applying them"
)]
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
    let cfg = config::load(Some(&args.config))?;
    if !cfg.directory.enabled {
        anyhow::bail!("directory subsystem is disabled in {}", args.config.display());
    }

    let discord = DiscordClient::from_config(&cfg);
    let directory = ManagedDirectory::from_config(&cfg)?;

    let members = discord
        .list_members(cfg.discord.guild_id)
        .await
        .context("failed to fetch guild roster")?;
    let users = directory
        .find_users()
        .await
        .context("failed to fetch directory users")?;
    info!(members = members.len(), users = users.len(), "fetched snapshots");

    let diff = compute_diff(
        &members,
        &users,
        &cfg.group_mapping(),
        cfg.directory.gating_role_id,
    );
    println!("{}", report::diff_overview(&diff));
    Ok(())
}
