//! Text of every message the bot posts.
use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::model::{BootstrapKind, CommunityMember, DirectoryUser, SyncAction};
use crate::reconcile::DiffReport;
use crate::sync::PassReport;
use crate::team_sync::TeamSyncFigures;

/// First line of the bootstrap message; also how the bot recognises it in history.
pub const BOOTSTRAP_HEADER: &str = "# Directory Enrollment";

pub const NOT_ELIGIBLE: &str = "You are not eligible for LDAP enrollment.";

pub const ENROLLMENT_DISABLED: &str = "Directory enrollment is currently disabled.";

/// Discord's limit on message content length.
pub const MESSAGE_LIMIT: usize = 2000;

pub const MISSING_EMPLOYEE_NUMBER_ALERT: &str = ":x: LDAP Sync: Some users are missing an \
employee number. This may lead to duplicate users, please rectify.";

pub fn error_message(title: &str, description: &str) -> String {
    format!(":no_entry_sign: **{}** {}", title, description)
}

pub fn command_error(err: &anyhow::Error) -> String {
    error_message(
        "'Tis but a scratch!",
        &format!("Command raised an error: `{}`", err),
    )
}

/// Render a timestamp with Discord's client-side formatting.
pub fn discord_timestamp(time: DateTime<Utc>, style: char) -> String {
    format!("<t:{}:{}>", time.timestamp(), style)
}

pub fn bootstrap_topic(devops_channel_id: u64, login_url: &str) -> String {
    format!(
        "This channel is used for LDAP enrollment. If you have been added to the LDAP directory, \
you will receive a message here with instructions on how to create your login credentials.\n\n\
If you have any questions or need help, feel free to ask in the <#{}> channel.\n\n\
You can login to your account at <{}>.",
        devops_channel_id, login_url
    )
}

pub fn bootstrap_message(devops_channel_id: u64) -> String {
    format!(
        "{BOOTSTRAP_HEADER}\nHello! :wave:\n\n\
You have been added to the LDAP directory. You can now log in to managed services using a \
newly created directory account.\n\n\
**Please press the button below to generate your login credentials.**\n\n\
You will be prompted to change your password on first login. You will then be prompted to \
optionally update your name and forwarding email address.\n\n\
Once you have set these credentials, hold onto them as they will be used to access the \
services we run.\n\n\
If you have any questions or need help, feel free to ask in the <#{devops_channel_id}> channel.\n\
## Important Information\n\
- Your username will be set to your Discord account name. Please let DevOps know if you would \
prefer something else.\n\
- Once you have logged into the account console, you can update your forwarding address.\n"
    )
}

pub fn eligible_prompt(member: &CommunityMember) -> String {
    format!(
        "Hi {}! You have roles that make you eligible for a new LDAP account. \
Please read the message above to get started!",
        member.mention()
    )
}

pub fn credentials(kind: BootstrapKind, username: &str, password: &str, login_url: &str) -> String {
    format!(
        "## {}

To get started, you will need to login [here](<{}>) using the following credentials:

- **Username:** `{}`
- **Password:** ||`{}`||

You will be prompted to reset your password after logging in.",
        kind.title(),
        login_url,
        username,
        password
    )
}

fn format_member(member: &CommunityMember, user: Option<&DirectoryUser>) -> String {
    match user {
        Some(user) if user.uid != member.name => format!("{} (LDAP: {})", member.name, user.uid),
        _ => member.name.clone(),
    }
}

/// Overview posted in reply to `directory sync`.
pub fn diff_overview(report: &DiffReport) -> String {
    let mut out = String::from("# LDAP Sync Overview\n");
    let counts = &report.counts;
    let _ = writeln!(out, "**Adding Users:** {}", counts.get(SyncAction::Add));
    let _ = writeln!(out, "**Removing Users:** {}", counts.get(SyncAction::Remove));
    let _ = writeln!(out, "**Keeping Users:** {}", counts.get(SyncAction::Keep));
    let _ = writeln!(out, "**Changing Users:** {}", counts.get(SyncAction::Change));

    out.push_str("```diff\n");
    for entry in report.sorted_entries() {
        let groups: Vec<&str> = entry.target_groups.iter().map(String::as_str).collect();
        let _ = writeln!(
            out,
            "{}  {} ({})",
            entry.action.diff_prefix(),
            format_member(&entry.member, entry.directory_user.as_ref()),
            groups.join(", ")
        );
    }
    out.push_str("```\n");

    if !report.missing_correlation.is_empty() {
        out.push_str(
            ":warning: **Warning: Some LDAP users are missing an employee number. \
This may lead to duplicated users being created.**\n\n",
        );
        out.push_str("Users missing employee numbers:\n");
        let uids: Vec<String> = report
            .missing_correlation
            .iter()
            .map(|u| format!("- `{}`", u.uid))
            .collect();
        out.push_str(&uids.join("\n"));
    }

    out
}

/// Operator summary for a pass that had failing entries.
pub fn pass_failures(report: &PassReport) -> String {
    let mut out = format!(
        ":warning: LDAP Sync: {} of {} actions failed.\n",
        report.failures.len(),
        report.counts.total() - report.counts.get(SyncAction::Keep)
    );
    for failure in &report.failures {
        let _ = writeln!(
            out,
            "- `{}` ({}): {}",
            failure.member_name, failure.action, failure.error
        );
    }
    out
}

pub fn pass_aborted(reason: &str, at: DateTime<Utc>) -> String {
    format!(
        ":x: LDAP Sync: pass aborted {}: `{}`",
        discord_timestamp(at, 'f'),
        reason
    )
}

pub fn team_sync_summary(figures: &[TeamSyncFigures]) -> String {
    if figures.is_empty() {
        return "No Grafana teams are mapped to directory groups.".to_string();
    }
    let mut out = String::from("**Grafana Sync Stats**\n");
    for team in figures {
        match &team.error {
            Some(err) => {
                let _ = writeln!(out, "**{}**: failed: `{}`", team.team, err);
            }
            None => {
                let _ = writeln!(
                    out,
                    "**{}**: Missing: {}, Added: {}, Removed: {}",
                    team.team, team.missing, team.added, team.removed
                );
            }
        }
    }
    out
}

/// Split text on line boundaries into chunks of at most `limit` bytes.
/// A code fence left open at a split is closed and reopened in the next chunk.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut open_fence: Option<&str> = None;

    for line in text.lines() {
        let reopen = open_fence.map(|f| f.len() + 1).unwrap_or(0);
        if !current.is_empty() && current.len() + line.len() + 1 + 4 > limit {
            if open_fence.is_some() {
                current.push_str("```\n");
            }
            chunks.push(std::mem::take(&mut current));
            if let Some(fence) = open_fence {
                current.push_str(fence);
                current.push('\n');
            }
        }
        if reopen + line.len() + 1 + 4 > limit {
            // A single line that can never fit is cut at a char boundary.
            let mut end = limit.saturating_sub(reopen + 5);
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            current.push_str(&line[..end]);
        } else {
            current.push_str(line);
        }
        current.push('\n');

        if line.starts_with("```") {
            open_fence = match open_fence {
                Some(_) => None,
                None => Some(line),
            };
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}
