use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// An account in the directory service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryUser {
    pub uid: String,
    /// Correlation key linking the account to a Discord member id.
    pub employee_number: Option<String>,
    pub display_name: Option<String>,
    /// Managed groups only; anything outside the group mapping is dropped on read.
    pub groups: BTreeSet<String>,
}

/// A member of the Discord guild roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunityMember {
    pub id: u64,
    pub name: String,
    pub display_name: String,
    pub roles: BTreeSet<u64>,
    pub bot: bool,
}

impl CommunityMember {
    pub fn has_role(&self, role_id: u64) -> bool {
        self.roles.contains(&role_id)
    }

    pub fn correlation_key(&self) -> String {
        self.id.to_string()
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncAction {
    Add,
    Remove,
    Keep,
    Change,
}

impl SyncAction {
    pub const ALL: [SyncAction; 4] = [
        SyncAction::Add,
        SyncAction::Remove,
        SyncAction::Keep,
        SyncAction::Change,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Add => "add",
            SyncAction::Remove => "remove",
            SyncAction::Keep => "keep",
            SyncAction::Change => "change",
        }
    }

    /// Prefix used for the line in a ```diff``` overview block.
    pub fn diff_prefix(&self) -> char {
        match self {
            SyncAction::Add => '+',
            SyncAction::Remove => '-',
            SyncAction::Keep => ' ',
            SyncAction::Change => '~',
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action required to bring one member's directory account in line with their roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub member: CommunityMember,
    pub directory_user: Option<DirectoryUser>,
    pub target_groups: BTreeSet<String>,
    pub action: SyncAction,
}

/// Number of diff entries per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub add: usize,
    pub remove: usize,
    pub keep: usize,
    pub change: usize,
}

impl SyncCounts {
    pub fn record(&mut self, action: SyncAction) {
        *self.slot(action) += 1;
    }

    pub fn get(&self, action: SyncAction) -> usize {
        match action {
            SyncAction::Add => self.add,
            SyncAction::Remove => self.remove,
            SyncAction::Keep => self.keep,
            SyncAction::Change => self.change,
        }
    }

    pub fn total(&self) -> usize {
        self.add + self.remove + self.keep + self.change
    }

    fn slot(&mut self, action: SyncAction) -> &mut usize {
        match action {
            SyncAction::Add => &mut self.add,
            SyncAction::Remove => &mut self.remove,
            SyncAction::Keep => &mut self.keep,
            SyncAction::Change => &mut self.change,
        }
    }
}

/// Static mapping between directory groups and Discord roles.
///
/// Only groups present here are ever read from or written to the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMapping {
    group_to_role: BTreeMap<String, u64>,
}

impl GroupMapping {
    pub fn new(group_to_role: BTreeMap<String, u64>) -> Self {
        Self { group_to_role }
    }

    pub fn contains_group(&self, group: &str) -> bool {
        self.group_to_role.contains_key(group)
    }

    pub fn role_for_group(&self, group: &str) -> Option<u64> {
        self.group_to_role.get(group).copied()
    }

    pub fn group_for_role(&self, role_id: u64) -> Option<&str> {
        self.group_to_role
            .iter()
            .find(|(_, role)| **role == role_id)
            .map(|(group, _)| group.as_str())
    }

    pub fn role_ids(&self) -> BTreeSet<u64> {
        self.group_to_role.values().copied().collect()
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.group_to_role.keys().map(String::as_str)
    }

    /// Directory groups granted by the given set of roles.
    pub fn groups_for_roles(&self, roles: &BTreeSet<u64>) -> BTreeSet<String> {
        self.group_to_role
            .iter()
            .filter(|(_, role)| roles.contains(role))
            .map(|(group, _)| group.clone())
            .collect()
    }

    /// Keep only the managed groups out of an arbitrary group list.
    pub fn managed<'a, I>(&self, groups: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        groups
            .into_iter()
            .filter(|g| self.contains_group(g))
            .map(str::to_owned)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BootstrapKind {
    Creation,
    Reset,
}

impl BootstrapKind {
    pub fn title(&self) -> &'static str {
        match self {
            BootstrapKind::Creation => "Account Creation",
            BootstrapKind::Reset => "Password Reset",
        }
    }
}
