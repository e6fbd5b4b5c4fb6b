//! Diff of the guild roster against the directory.
//!
//! Pure: both snapshots are fetched by the caller and every mutation is left to
//! the provisioning layer in [`crate::sync`].

use std::collections::{BTreeSet, HashMap};

use crate::model::{CommunityMember, DiffEntry, DirectoryUser, GroupMapping, SyncAction, SyncCounts};

/// Output of a single reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    pub entries: Vec<DiffEntry>,
    /// Directory users without a correlation key; they can never be matched and
    /// risk a duplicate account being created for their owner.
    pub missing_correlation: Vec<DirectoryUser>,
    pub counts: SyncCounts,
}

impl DiffReport {
    pub fn entries_with(&self, action: SyncAction) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(move |e| e.action == action)
    }

    /// Entries grouped by action, then by member name.
    pub fn sorted_entries(&self) -> Vec<&DiffEntry> {
        let mut sorted: Vec<&DiffEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| {
            a.action
                .cmp(&b.action)
                .then_with(|| a.member.name.cmp(&b.member.name))
        });
        sorted
    }
}

/// Compute the action needed for every non-bot member.
pub fn compute_diff(
    members: &[CommunityMember],
    directory_users: &[DirectoryUser],
    mapping: &GroupMapping,
    gating_role_id: u64,
) -> DiffReport {
    let by_key: HashMap<&str, &DirectoryUser> = directory_users
        .iter()
        .filter_map(|u| u.employee_number.as_deref().map(|key| (key, u)))
        .collect();

    let mut report = DiffReport {
        missing_correlation: directory_users
            .iter()
            .filter(|u| u.employee_number.is_none())
            .cloned()
            .collect(),
        ..DiffReport::default()
    };

    for member in members.iter().filter(|m| !m.bot) {
        let key = member.correlation_key();
        let linked = by_key.get(key.as_str()).copied();

        let target_groups = if member.has_role(gating_role_id) {
            mapping.groups_for_roles(&member.roles)
        } else {
            BTreeSet::new()
        };

        let action = match (linked, target_groups.is_empty()) {
            (None, true) => continue,
            (None, false) => SyncAction::Add,
            (Some(_), true) => SyncAction::Remove,
            (Some(user), false) => {
                let current = mapping.managed(user.groups.iter().map(String::as_str));
                if current == target_groups {
                    SyncAction::Keep
                } else {
                    SyncAction::Change
                }
            }
        };

        report.counts.record(action);
        report.entries.push(DiffEntry {
            member: member.clone(),
            directory_user: linked.cloned(),
            target_groups,
            action,
        });
    }

    report
}
