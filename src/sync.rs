//! Reconciliation passes and the queue that schedules them.
//!
//! Two producers (the interval timer and member role changes) feed a channel of
//! capacity one. A request that arrives while another is already queued is
//! dropped, and a single consumer runs passes one after another.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::directory::{Directory, DirectoryError};
use crate::discord::{CommunityPlatform, OutgoingMessage, PlatformError};
use crate::model::{CommunityMember, DiffEntry, GroupMapping, SyncAction, SyncCounts};
use crate::notifier::Notifier;
use crate::reconcile::{compute_diff, DiffReport};
use crate::report;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("directory sync is disabled")]
    Disabled,
    #[error("failed to fetch guild roster: {0}")]
    Roster(#[source] PlatformError),
    #[error("failed to fetch directory users: {0}")]
    Directory(#[source] DirectoryError),
    #[error("timed out fetching {0}")]
    Timeout(&'static str),
}

/// A diff entry whose provisioning call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub member_id: u64,
    pub member_name: String,
    pub action: SyncAction,
    pub error: String,
}

/// Outcome of a pass that got as far as applying its diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub counts: SyncCounts,
    pub missing_correlation: Vec<String>,
    pub failures: Vec<EntryFailure>,
    pub prompted: usize,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub guild_id: u64,
    pub gating_role_id: u64,
    pub devops_channel_id: u64,
    pub notifications_enabled: bool,
    pub mapping: GroupMapping,
    pub call_timeout: Duration,
}

/// Last known role set of every guild member, refreshed by each pass.
#[derive(Debug, Clone, Default)]
pub struct RosterCache {
    roles: Arc<Mutex<HashMap<u64, BTreeSet<u64>>>>,
}

impl RosterCache {
    pub async fn replace(&self, members: &[CommunityMember]) {
        let mut guard = self.roles.lock().await;
        guard.clear();
        guard.extend(members.iter().map(|m| (m.id, m.roles.clone())));
    }

    /// Store the member's current roles and return what was known before.
    pub async fn update(&self, member_id: u64, roles: BTreeSet<u64>) -> Option<BTreeSet<u64>> {
        self.roles.lock().await.insert(member_id, roles)
    }

    pub async fn member_count(&self) -> usize {
        self.roles.lock().await.len()
    }
}

/// Whether a role change should request a pass. Members absent from the cache
/// only trigger when they now hold the gating role.
pub fn should_trigger(
    before: Option<&BTreeSet<u64>>,
    after: &BTreeSet<u64>,
    gating_role_id: u64,
) -> bool {
    match before {
        Some(before) => {
            let gated = before.contains(&gating_role_id) || after.contains(&gating_role_id);
            before != after && gated
        }
        None => after.contains(&gating_role_id),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    Timer,
    RoleChange,
}

#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<SyncRequest>,
}

impl SyncTrigger {
    pub fn channel() -> (SyncTrigger, mpsc::Receiver<SyncRequest>) {
        let (tx, rx) = mpsc::channel(1);
        (SyncTrigger { tx }, rx)
    }

    /// Queue a pass. Returns false when one is already queued or the worker is gone.
    pub fn request(&self, reason: SyncRequest) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(?reason, "sync already queued");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(?reason, "sync worker stopped");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn bounded<T, E: Display>(
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
    }
}

pub struct Syncer {
    directory: Arc<dyn Directory>,
    platform: Arc<dyn CommunityPlatform>,
    notifier: Notifier,
    settings: SyncSettings,
    roster: RosterCache,
}

impl Syncer {
    pub fn new(
        directory: Arc<dyn Directory>,
        platform: Arc<dyn CommunityPlatform>,
        notifier: Notifier,
        settings: SyncSettings,
    ) -> Self {
        Self {
            directory,
            platform,
            notifier,
            settings,
            roster: RosterCache::default(),
        }
    }

    pub fn roster(&self) -> RosterCache {
        self.roster.clone()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Fetch both snapshots and diff them. Nothing is applied.
    #[instrument(skip_all)]
    pub async fn snapshot(&self) -> Result<DiffReport, SyncError> {
        let limit = self.settings.call_timeout;
        let roster = self.platform.list_members(self.settings.guild_id);
        let members = tokio::time::timeout(limit, roster)
            .await
            .map_err(|_| SyncError::Timeout("guild roster"))?
            .map_err(SyncError::Roster)?;
        let users = tokio::time::timeout(limit, self.directory.find_users())
            .await
            .map_err(|_| SyncError::Timeout("directory users"))?
            .map_err(SyncError::Directory)?;
        debug!(members = members.len(), users = users.len(), "fetched snapshots");

        self.roster.replace(&members).await;
        Ok(compute_diff(
            &members,
            &users,
            &self.settings.mapping,
            self.settings.gating_role_id,
        ))
    }

    /// Run one pass: diff, then apply every entry independently.
    #[instrument(skip_all)]
    pub async fn run_pass(&self) -> Result<PassReport, SyncError> {
        let diff = self.snapshot().await?;
        let counts = diff.counts;
        info!(
            add = counts.add,
            remove = counts.remove,
            keep = counts.keep,
            change = counts.change,
            "computed directory diff"
        );

        let mut report = PassReport {
            counts,
            missing_correlation: diff
                .missing_correlation
                .iter()
                .map(|u| u.uid.clone())
                .collect(),
            ..PassReport::default()
        };

        if !report.missing_correlation.is_empty() {
            error!(
                uids = ?report.missing_correlation,
                "directory users are missing an employee number"
            );
            self.alert(report::MISSING_EMPLOYEE_NUMBER_ALERT).await;
        }

        let notified = self.notified_if_needed(&diff, &mut report).await;

        for entry in &diff.entries {
            let result = match entry.action {
                SyncAction::Keep => continue,
                SyncAction::Add => {
                    let Some(notified) = &notified else { continue };
                    if notified.contains(&entry.member.id) {
                        continue;
                    }
                    let prompt = self.notifier.prompt(&entry.member);
                    let res = bounded(self.settings.call_timeout, prompt).await;
                    if res.is_ok() {
                        report.prompted += 1;
                    }
                    res
                }
                SyncAction::Remove => {
                    let Some(uid) = linked_uid(entry) else { continue };
                    let deactivate = self.directory.deactivate_account(uid);
                    bounded(self.settings.call_timeout, deactivate).await
                }
                SyncAction::Change => {
                    let Some(uid) = linked_uid(entry) else { continue };
                    bounded(
                        self.settings.call_timeout,
                        self.directory.set_groups(uid, &entry.target_groups),
                    )
                    .await
                }
            };
            if let Err(error) = result {
                warn!(
                    member_id = entry.member.id,
                    action = %entry.action,
                    error = %error,
                    "failed to apply diff entry"
                );
                report.failures.push(EntryFailure {
                    member_id: entry.member.id,
                    member_name: entry.member.name.clone(),
                    action: entry.action,
                    error,
                });
            }
        }

        if !report.failures.is_empty() {
            self.alert(&report::pass_failures(&report)).await;
        }
        info!(
            prompted = report.prompted,
            failures = report.failures.len(),
            "directory sync complete"
        );
        Ok(report)
    }

    /// Run a pass and turn a pass-level failure into a single operator alert.
    pub async fn run_pass_and_alert(&self) -> Option<PassReport> {
        match self.run_pass().await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(?err, "directory sync aborted");
                self.alert(&report::pass_aborted(&err.to_string(), Utc::now()))
                    .await;
                None
            }
        }
    }

    /// History scan for prompt dedup. Skipped entirely when no prompt could be sent;
    /// if the scan fails every Add entry is recorded as failed.
    async fn notified_if_needed(
        &self,
        diff: &DiffReport,
        report: &mut PassReport,
    ) -> Option<HashSet<u64>> {
        if !self.settings.notifications_enabled || diff.counts.add == 0 {
            return None;
        }
        match bounded(self.settings.call_timeout, self.notifier.notified()).await {
            Ok(notified) => Some(notified),
            Err(error) => {
                warn!(error = %error, "failed to read bootstrap channel history");
                for entry in diff.entries_with(SyncAction::Add) {
                    report.failures.push(EntryFailure {
                        member_id: entry.member.id,
                        member_name: entry.member.name.clone(),
                        action: SyncAction::Add,
                        error: error.clone(),
                    });
                }
                None
            }
        }
    }

    /// Post to the devops channel, split to fit Discord's message limit.
    async fn alert(&self, content: &str) {
        for chunk in report::split_message(content, report::MESSAGE_LIMIT) {
            let message = OutgoingMessage::text(chunk);
            let send = self
                .platform
                .send_message(self.settings.devops_channel_id, &message);
            if let Err(err) = bounded(self.settings.call_timeout, send).await {
                error!(error = %err, "failed to post alert to devops channel");
                return;
            }
        }
    }
}

fn linked_uid(entry: &DiffEntry) -> Option<&str> {
    entry.directory_user.as_ref().map(|u| u.uid.as_str())
}

/// Consume sync requests until every trigger is dropped.
pub async fn run_worker(syncer: Arc<Syncer>, mut requests: mpsc::Receiver<SyncRequest>) {
    while let Some(reason) = requests.recv().await {
        info!(?reason, "starting directory sync");
        syncer.run_pass_and_alert().await;
    }
    info!("sync worker stopped");
}

/// Request a pass every `period`, starting immediately.
pub async fn run_timer(trigger: SyncTrigger, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if trigger.is_closed() {
            return;
        }
        trigger.request(SyncRequest::Timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATE: u64 = 7;

    fn roles(ids: &[u64]) -> BTreeSet<u64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn triggers_only_on_gated_role_changes() {
        assert!(should_trigger(Some(&roles(&[GATE])), &roles(&[GATE, 1]), GATE));
        assert!(should_trigger(Some(&roles(&[GATE, 1])), &roles(&[1]), GATE));
        assert!(should_trigger(Some(&roles(&[1])), &roles(&[1, GATE]), GATE));
        assert!(!should_trigger(Some(&roles(&[1])), &roles(&[1, 2]), GATE));
        assert!(!should_trigger(Some(&roles(&[GATE])), &roles(&[GATE]), GATE));
    }

    #[test]
    fn unknown_member_triggers_when_gated() {
        assert!(should_trigger(None, &roles(&[GATE]), GATE));
        assert!(!should_trigger(None, &roles(&[1]), GATE));
    }

    #[tokio::test]
    async fn roster_cache_returns_previous_roles() {
        let cache = RosterCache::default();
        let member = CommunityMember {
            id: 5,
            name: "alice".into(),
            display_name: "Alice".into(),
            roles: roles(&[1]),
            bot: false,
        };
        cache.replace(&[member]).await;
        assert_eq!(cache.update(5, roles(&[1, GATE])).await, Some(roles(&[1])));
        assert_eq!(cache.update(6, roles(&[GATE])).await, None);
        assert_eq!(cache.member_count().await, 2);
    }

    #[tokio::test]
    async fn queued_requests_collapse() {
        let (trigger, mut rx) = SyncTrigger::channel();
        assert!(trigger.request(SyncRequest::RoleChange));
        assert!(!trigger.request(SyncRequest::Timer));
        assert_eq!(rx.recv().await, Some(SyncRequest::RoleChange));
        assert!(trigger.request(SyncRequest::Timer));
        drop(rx);
        assert!(!trigger.request(SyncRequest::Timer));
        assert!(trigger.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_requests_immediately_then_each_period() {
        let (trigger, mut rx) = SyncTrigger::channel();
        let handle = tokio::spawn(run_timer(trigger, Duration::from_secs(600)));
        assert_eq!(rx.recv().await, Some(SyncRequest::Timer));
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(rx.recv().await, Some(SyncRequest::Timer));
        handle.abort();
    }
}
