//! Directory service access: the provisioning contract and its FreeIPA/Keycloak backing.
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::instrument;

use crate::config::Config;
use crate::model::DirectoryUser;

pub mod freeipa;
pub mod keycloak;

pub use freeipa::FreeIpaClient;
pub use keycloak::KeycloakClient;

pub const PASSWORD_LENGTH: usize = 24;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unreachable: {0}")]
    Unavailable(String),
    #[error("directory rejected {method}: {name} ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        name: String,
        message: String,
    },
    #[error("account {0} already exists")]
    AlreadyExists(String),
    #[error("account {0} not found")]
    NotFound(String),
    #[error("unexpected directory response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DirectoryError::Decode(err.to_string())
        } else {
            DirectoryError::Unavailable(err.to_string())
        }
    }
}

/// Provisioning operations the reconciler and enrollment flow rely on.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Every managed account, with groups restricted to the group mapping.
    async fn find_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError>;

    async fn find_by_correlation_key(&self, key: &str)
        -> Result<Option<DirectoryUser>, DirectoryError>;

    /// Create an account and return its one-time password.
    async fn create_account(
        &self,
        uid: &str,
        display_name: &str,
        groups: &BTreeSet<String>,
        correlation_key: &str,
    ) -> Result<String, DirectoryError>;

    /// Lock an account. Locking an already locked account succeeds.
    async fn deactivate_account(&self, uid: &str) -> Result<(), DirectoryError>;

    /// Replace membership of managed groups; unmanaged groups are left alone.
    async fn set_groups(&self, uid: &str, groups: &BTreeSet<String>) -> Result<(), DirectoryError>;

    /// Set a temporary password and return it.
    async fn force_password_reset(&self, uid: &str) -> Result<String, DirectoryError>;

    /// Uids of the members of a directory group.
    async fn group_members(&self, group: &str) -> Result<BTreeSet<String>, DirectoryError>;
}

/// FreeIPA for account data, Keycloak for credentials.
#[derive(Debug, Clone)]
pub struct ManagedDirectory {
    ipa: FreeIpaClient,
    keycloak: KeycloakClient,
}

impl ManagedDirectory {
    pub fn new(ipa: FreeIpaClient, keycloak: KeycloakClient) -> Self {
        Self { ipa, keycloak }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, DirectoryError> {
        let ipa = FreeIpaClient::new(
            &cfg.directory.freeipa,
            cfg.group_mapping(),
            cfg.directory.mail_domain.clone(),
            cfg.request_timeout(),
        )?;
        let keycloak = KeycloakClient::new(&cfg.keycloak, cfg.request_timeout())?;
        Ok(Self::new(ipa, keycloak))
    }
}

#[async_trait]
impl Directory for ManagedDirectory {
    async fn find_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        self.ipa.find_users().await
    }

    async fn find_by_correlation_key(
        &self,
        key: &str,
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        self.ipa.find_by_employee_number(key).await
    }

    async fn create_account(
        &self,
        uid: &str,
        display_name: &str,
        groups: &BTreeSet<String>,
        correlation_key: &str,
    ) -> Result<String, DirectoryError> {
        let password = generate_password();
        self.ipa
            .create_user(uid, display_name, &password, correlation_key)
            .await?;
        for group in groups {
            self.ipa.group_add_member(group, uid).await?;
        }
        Ok(password)
    }

    async fn deactivate_account(&self, uid: &str) -> Result<(), DirectoryError> {
        self.ipa.deactivate_user(uid).await
    }

    #[instrument(skip_all, fields(uid = %uid))]
    async fn set_groups(&self, uid: &str, groups: &BTreeSet<String>) -> Result<(), DirectoryError> {
        let current = self.ipa.user_groups(uid).await?;
        let (add, remove) = group_changes(&current, groups, |g| self.ipa.is_managed(g));
        for group in add {
            self.ipa.group_add_member(&group, uid).await?;
        }
        for group in remove {
            self.ipa.group_remove_member(&group, uid).await?;
        }
        Ok(())
    }

    async fn force_password_reset(&self, uid: &str) -> Result<String, DirectoryError> {
        let password = generate_password();
        self.keycloak.set_temporary_password(uid, &password).await?;
        Ok(password)
    }

    async fn group_members(&self, group: &str) -> Result<BTreeSet<String>, DirectoryError> {
        self.ipa.group_members(group).await
    }
}

/// Groups to join and leave so that managed membership equals `target`.
pub fn group_changes(
    current: &BTreeSet<String>,
    target: &BTreeSet<String>,
    is_managed: impl Fn(&str) -> bool,
) -> (Vec<String>, Vec<String>) {
    let add = target.difference(current).cloned().collect();
    let remove = current
        .difference(target)
        .filter(|g| is_managed(g.as_str()))
        .cloned()
        .collect();
    (add, remove)
}

pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}
