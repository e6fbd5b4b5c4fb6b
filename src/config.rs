//! Configuration loader and validator for the directory bot.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::GroupMapping;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    pub discord: Discord,
    pub directory: Directory,
    pub keycloak: Keycloak,
    #[serde(default)]
    pub grafana: Option<Grafana>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for App {
    fn default() -> Self {
        Self {
            prefixes: default_prefixes(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Discord bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discord {
    pub token: String,
    pub guild_id: u64,
    pub devops_role_id: u64,
    pub devops_channel_id: u64,
}

/// Directory synchronisation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Directory {
    #[serde(default)]
    pub enabled: bool,
    pub gating_role_id: u64,
    pub bootstrap_channel_id: u64,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// Directory group name -> Discord role id.
    pub role_mapping: BTreeMap<String, u64>,
    #[serde(default)]
    pub mail_domain: Option<String>,
    pub login_url: String,
    pub freeipa: FreeIpa,
}

/// FreeIPA JSON-RPC credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FreeIpa {
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

/// Keycloak admin credentials, used for password resets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Keycloak {
    pub address: String,
    pub username: String,
    pub password: String,
    pub realm: String,
}

/// Grafana team sync settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grafana {
    pub url: String,
    pub token: String,
    /// Grafana team name -> directory group name.
    pub team_mapping: BTreeMap<String, String>,
    #[serde(default = "default_team_sync_interval")]
    pub sync_interval_secs: u64,
}

fn default_prefixes() -> Vec<String> {
    vec!["arthur ".to_string(), "M-x ".to_string()]
}

fn default_request_timeout() -> u64 {
    30
}

fn default_sync_interval() -> u64 {
    600
}

fn default_team_sync_interval() -> u64 {
    12 * 60 * 60
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn group_mapping(&self) -> GroupMapping {
        GroupMapping::new(self.directory.role_mapping.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.app.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.directory.sync_interval_secs)
    }

    /// Override secrets from `ARTHUR_*` environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = get("ARTHUR_DISCORD_TOKEN") {
            self.discord.token = token;
        }
        if let Some(password) = get("ARTHUR_FREEIPA_PASSWORD") {
            self.directory.freeipa.password = password;
        }
        if let Some(password) = get("ARTHUR_KEYCLOAK_PASSWORD") {
            self.keycloak.password = password;
        }
        if let (Some(token), Some(grafana)) = (get("ARTHUR_GRAFANA_TOKEN"), self.grafana.as_mut()) {
            grafana.token = token;
        }
    }
}

/// Load configuration from a YAML file, apply env overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.prefixes.iter().all(|p| p.trim().is_empty()) {
        return Err(ConfigError::Invalid("app.prefixes must contain a non-empty prefix"));
    }
    if cfg.app.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.request_timeout_secs must be > 0"));
    }

    if cfg.discord.token.trim().is_empty() {
        return Err(ConfigError::Invalid("discord.token must be non-empty"));
    }
    if cfg.discord.guild_id == 0 {
        return Err(ConfigError::Invalid("discord.guild_id must be set"));
    }
    if cfg.discord.devops_channel_id == 0 {
        return Err(ConfigError::Invalid("discord.devops_channel_id must be set"));
    }
    if cfg.discord.devops_role_id == 0 {
        return Err(ConfigError::Invalid("discord.devops_role_id must be set"));
    }

    // Directory settings are only checked when the subsystem is enabled.
    if !cfg.directory.enabled {
        return Ok(());
    }

    let dir = &cfg.directory;
    if dir.gating_role_id == 0 {
        return Err(ConfigError::Invalid("directory.gating_role_id must be set"));
    }
    if dir.bootstrap_channel_id == 0 {
        return Err(ConfigError::Invalid("directory.bootstrap_channel_id must be set"));
    }
    if dir.sync_interval_secs == 0 {
        return Err(ConfigError::Invalid("directory.sync_interval_secs must be > 0"));
    }
    if dir.role_mapping.is_empty() {
        return Err(ConfigError::Invalid("directory.role_mapping must be non-empty"));
    }
    if dir.role_mapping.keys().any(|g| g.trim().is_empty()) {
        return Err(ConfigError::Invalid("directory.role_mapping group names must be non-empty"));
    }
    if dir.role_mapping.values().any(|role| *role == 0) {
        return Err(ConfigError::Invalid("directory.role_mapping role ids must be set"));
    }
    if dir.freeipa.host.trim().is_empty() {
        return Err(ConfigError::Invalid("directory.freeipa.host must be non-empty"));
    }
    if dir.freeipa.username.trim().is_empty() {
        return Err(ConfigError::Invalid("directory.freeipa.username must be non-empty"));
    }
    if dir.freeipa.password.trim().is_empty() {
        return Err(ConfigError::Invalid("directory.freeipa.password must be non-empty"));
    }

    if cfg.keycloak.address.trim().is_empty() {
        return Err(ConfigError::Invalid("keycloak.address must be non-empty"));
    }
    if cfg.keycloak.password.trim().is_empty() {
        return Err(ConfigError::Invalid("keycloak.password must be non-empty"));
    }
    if cfg.keycloak.realm.trim().is_empty() {
        return Err(ConfigError::Invalid("keycloak.realm must be non-empty"));
    }

    if let Some(grafana) = &cfg.grafana {
        if grafana.url.trim().is_empty() {
            return Err(ConfigError::Invalid("grafana.url must be non-empty"));
        }
        if grafana.token.trim().is_empty() {
            return Err(ConfigError::Invalid("grafana.token must be non-empty"));
        }
        if grafana.sync_interval_secs == 0 {
            return Err(ConfigError::Invalid("grafana.sync_interval_secs must be > 0"));
        }
        if grafana
            .team_mapping
            .values()
            .any(|group| !dir.role_mapping.contains_key(group))
        {
            return Err(ConfigError::Invalid(
                "grafana.team_mapping must only reference groups in directory.role_mapping",
            ));
        }
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  prefixes:
    - "arthur "
    - "M-x "
  request_timeout_secs: 30

discord:
  token: "YOUR_DISCORD_BOT_TOKEN"
  guild_id: 267624335836053506
  devops_role_id: 409416496733880320
  devops_channel_id: 675756741417369640

directory:
  enabled: true
  gating_role_id: 267630620367257601
  bootstrap_channel_id: 1266358923875586160
  sync_interval_secs: 600
  notifications_enabled: true
  mail_domain: "pydis.wtf"
  login_url: "https://id.pydis.wtf/realms/pydis/account"
  role_mapping:
    devops: 409416496733880320
    administrators: 267628507062992896
    moderators: 267629731250176001
    coredevs: 587606783669829632
    events: 787816728474288181
    directors: 267627879762755584
  freeipa:
    host: "ipa.box.pydis.wtf"
    username: "kingarthur"
    password: "YOUR_FREEIPA_PASSWORD"

keycloak:
  address: "https://id.pydis.wtf"
  username: "kingarthur"
  password: "YOUR_KEYCLOAK_PASSWORD"
  realm: "pydis"

grafana:
  url: "https://grafana.pydis.wtf"
  token: "YOUR_GRAFANA_TOKEN"
  team_mapping:
    devops: devops
    admins: administrators
    moderators: moderators
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_config() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_config();
        validate(&cfg).unwrap();
        assert_eq!(cfg.directory.role_mapping.len(), 6);
        assert!(cfg.directory.freeipa.verify_tls);
        assert_eq!(cfg.grafana.as_ref().unwrap().sync_interval_secs, 12 * 60 * 60);
    }

    #[test]
    fn app_section_defaults() {
        let yaml = example().replace(
            "app:\n  prefixes:\n    - \"arthur \"\n    - \"M-x \"\n  request_timeout_secs: 30\n",
            "",
        );
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.app, App::default());
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn invalid_discord_token() {
        let mut cfg = example_config();
        cfg.discord.token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("discord.token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_directory_settings() {
        let mut cfg = example_config();
        cfg.directory.role_mapping.clear();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("role_mapping")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_config();
        cfg.directory.sync_interval_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_config();
        cfg.directory.freeipa.password = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_config();
        cfg.keycloak.realm = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_ids_are_rejected() {
        let mut cfg = example_config();
        cfg.directory.role_mapping.insert("helpers".into(), 0);
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("role ids")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_config();
        cfg.discord.devops_role_id = 0;
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("devops_role_id")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn disabled_directory_skips_directory_checks() {
        let mut cfg = example_config();
        cfg.directory.enabled = false;
        cfg.directory.role_mapping.clear();
        cfg.directory.freeipa.password = "".into();
        validate(&cfg).unwrap();
    }

    #[test]
    fn grafana_team_mapping_must_reference_known_groups() {
        let mut cfg = example_config();
        cfg.grafana
            .as_mut()
            .unwrap()
            .team_mapping
            .insert("helpers".into(), "helpers".into());
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("team_mapping")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn env_overrides_replace_secrets() {
        let mut cfg = example_config();
        cfg.apply_overrides(|key| match key {
            "ARTHUR_DISCORD_TOKEN" => Some("from-env".into()),
            "ARTHUR_GRAFANA_TOKEN" => Some("grafana-env".into()),
            "ARTHUR_KEYCLOAK_PASSWORD" => Some("   ".into()),
            _ => None,
        });
        assert_eq!(cfg.discord.token, "from-env");
        assert_eq!(cfg.grafana.unwrap().token, "grafana-env");
        assert_eq!(cfg.keycloak.password, "YOUR_KEYCLOAK_PASSWORD");
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.discord.guild_id, 267624335836053506);
        assert_eq!(cfg.group_mapping().group_for_role(409416496733880320), Some("devops"));
    }
}
