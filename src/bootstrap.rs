use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::directory::Directory;
use crate::model::{BootstrapKind, CommunityMember, GroupMapping};
use crate::notifier::Notifier;
use crate::report;

pub const ENROLLMENT_FAILED: &str =
    "Something went wrong while generating your credentials. Please ask DevOps for help.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    NotEligible,
    Issued {
        kind: BootstrapKind,
        username: String,
        password: String,
    },
}

#[derive(Debug, Clone)]
pub struct EnrollmentSettings {
    pub gating_role_id: u64,
    pub mapping: GroupMapping,
    pub mail_domain: Option<String>,
    pub login_url: String,
    pub call_timeout: Duration,
}

/// Handles presses of the bootstrap button.
pub struct Enrollment {
    directory: Arc<dyn Directory>,
    notifier: Notifier,
    settings: EnrollmentSettings,
}

impl Enrollment {
    pub fn new(
        directory: Arc<dyn Directory>,
        notifier: Notifier,
        settings: EnrollmentSettings,
    ) -> Self {
        Self {
            directory,
            notifier,
            settings,
        }
    }

    /// Create an account for the member, or reset the password of the one they already own.
    #[instrument(skip_all, fields(member_id = member.id))]
    pub async fn bootstrap(&self, member: &CommunityMember) -> Result<BootstrapOutcome> {
        if !member.has_role(self.settings.gating_role_id) {
            return Ok(BootstrapOutcome::NotEligible);
        }
        let limit = self.settings.call_timeout;
        let key = member.correlation_key();

        let existing = tokio::time::timeout(limit, self.directory.find_by_correlation_key(&key))
            .await
            .context("directory lookup timed out")??;

        if let Some(user) = existing {
            let reset = self.directory.force_password_reset(&user.uid);
            let password = tokio::time::timeout(limit, reset)
                .await
                .context("password reset timed out")??;
            info!(uid = %user.uid, "reset password");
            return Ok(BootstrapOutcome::Issued {
                kind: BootstrapKind::Reset,
                username: user.uid,
                password,
            });
        }

        let groups = self.settings.mapping.groups_for_roles(&member.roles);
        let password = tokio::time::timeout(
            limit,
            self.directory
                .create_account(&member.name, &member.display_name, &groups, &key),
        )
        .await
        .context("account creation timed out")??;
        info!(uid = %member.name, ?groups, "created account");

        match self.notifier.retract_prompt(member.id).await {
            Ok(true) => {}
            Ok(false) => info!("no enrollment prompt to retract"),
            Err(err) => warn!(?err, "failed to retract enrollment prompt"),
        }

        Ok(BootstrapOutcome::Issued {
            kind: BootstrapKind::Creation,
            username: member.name.clone(),
            password,
        })
    }

    /// Text of the ephemeral reply to a button press. Failures never leak details.
    pub async fn respond(&self, member: &CommunityMember) -> String {
        match self.bootstrap(member).await {
            Ok(BootstrapOutcome::NotEligible) => report::NOT_ELIGIBLE.to_string(),
            Ok(BootstrapOutcome::Issued {
                kind,
                username,
                password,
            }) => report::credentials(
                kind,
                &self.login_name(&username),
                &password,
                &self.settings.login_url,
            ),
            Err(err) => {
                error!(?err, member_id = member.id, "enrollment failed");
                ENROLLMENT_FAILED.to_string()
            }
        }
    }

    fn login_name(&self, uid: &str) -> String {
        match &self.settings.mail_domain {
            Some(domain) => format!("{}@{}", uid, domain),
            None => uid.to_string(),
        }
    }
}
