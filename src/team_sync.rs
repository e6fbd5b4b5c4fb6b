//! Keeps Grafana team membership in line with directory groups.
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use crate::directory::Directory;
use crate::grafana::{GrafanaService, GrafanaUser, Team};

/// What one team sync did. `error` is set when the team could not be processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamSyncFigures {
    pub team: String,
    pub missing: usize,
    pub added: usize,
    pub removed: usize,
    pub error: Option<String>,
}

/// Org users to add and remove so the team's LDAP members equal `group_members`.
pub fn plan_team_changes<'a>(
    group_members: &BTreeSet<String>,
    team_members: &[GrafanaUser],
    org_users: &'a [GrafanaUser],
) -> (usize, Vec<&'a GrafanaUser>, Vec<&'a GrafanaUser>) {
    let current: BTreeSet<&str> = team_members
        .iter()
        .filter(|m| m.is_ldap())
        .map(|m| m.login.as_str())
        .collect();
    let missing: BTreeSet<&str> = group_members
        .iter()
        .map(String::as_str)
        .filter(|login| !current.contains(login))
        .collect();

    let add = org_users
        .iter()
        .filter(|u| u.is_ldap() && missing.contains(u.login.as_str()))
        .collect();
    let remove = org_users
        .iter()
        .filter(|u| current.contains(u.login.as_str()) && !group_members.contains(&u.login))
        .collect();
    (missing.len(), add, remove)
}

pub struct TeamSync {
    grafana: Arc<dyn GrafanaService>,
    directory: Arc<dyn Directory>,
    /// Grafana team name to directory group.
    team_mapping: BTreeMap<String, String>,
}

impl TeamSync {
    pub fn new(
        grafana: Arc<dyn GrafanaService>,
        directory: Arc<dyn Directory>,
        team_mapping: BTreeMap<String, String>,
    ) -> Self {
        Self {
            grafana,
            directory,
            team_mapping,
        }
    }

    /// Sync every mapped team. A failing team does not stop the others.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<Vec<TeamSyncFigures>> {
        let teams = self.grafana.list_teams().await?;
        let mut figures = Vec::new();
        for team in teams {
            let Some(group) = self.team_mapping.get(&team.name) else {
                debug!(team = %team.name, "grafana team not mapped");
                continue;
            };
            match self.sync_team(&team, group).await {
                Ok(team_figures) => {
                    info!(
                        team = %team.name,
                        missing = team_figures.missing,
                        added = team_figures.added,
                        removed = team_figures.removed,
                        "synced grafana team"
                    );
                    figures.push(team_figures);
                }
                Err(err) => {
                    error!(?err, team = %team.name, "error while processing grafana team");
                    figures.push(TeamSyncFigures {
                        team: team.name.clone(),
                        error: Some(err.to_string()),
                        ..TeamSyncFigures::default()
                    });
                }
            }
        }
        Ok(figures)
    }

    async fn sync_team(&self, team: &Team, group: &str) -> Result<TeamSyncFigures> {
        let group_members = self.directory.group_members(group).await?;
        let team_members = self.grafana.team_members(team.id).await?;
        let org_users = self.grafana.org_users().await?;

        let (missing, add, remove) = plan_team_changes(&group_members, &team_members, &org_users);
        for user in &add {
            self.grafana.add_team_member(team.id, user.user_id).await?;
        }
        for user in &remove {
            self.grafana.remove_team_member(team.id, user.user_id).await?;
        }
        Ok(TeamSyncFigures {
            team: team.name.clone(),
            missing,
            added: add.len(),
            removed: remove.len(),
            error: None,
        })
    }
}

/// Run a team sync every `period`, starting immediately.
pub async fn run_timer(sync: Arc<TeamSync>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = sync.run().await {
            error!(?err, "grafana team sync failed");
        }
    }
}
