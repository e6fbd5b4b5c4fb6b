use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::DirectoryError;
use crate::config::FreeIpa;
use crate::model::{DirectoryUser, GroupMapping};

const API_VERSION: &str = "2.251";

const ERR_NOT_FOUND: i64 = 4001;
const ERR_DUPLICATE_ENTRY: i64 = 4002;
const ERR_EMPTY_MODLIST: i64 = 4202;

/// JSON-RPC client for the FreeIPA management API.
#[derive(Clone)]
pub struct FreeIpaClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    mapping: GroupMapping,
    mail_domain: Option<String>,
}

impl fmt::Debug for FreeIpaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeIpaClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct FindResult<T> {
    result: Vec<T>,
}

#[derive(Deserialize)]
struct ShowResult<T> {
    result: T,
}

/// A user entry as returned by `user_find`/`user_show` with `all: true`.
#[derive(Debug, Deserialize)]
struct IpaUser {
    uid: Vec<String>,
    #[serde(default)]
    employeenumber: Option<Vec<String>>,
    #[serde(default)]
    displayname: Option<Vec<String>>,
    #[serde(default)]
    memberof_group: Vec<String>,
    #[serde(default)]
    mail: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IpaGroup {
    #[serde(default)]
    member_user: Vec<String>,
}

impl IpaUser {
    fn into_directory_user(self, mapping: &GroupMapping) -> Option<DirectoryUser> {
        let uid = self.uid.into_iter().next()?;
        Some(DirectoryUser {
            uid,
            employee_number: self.employeenumber.and_then(|v| v.into_iter().next()),
            display_name: self.displayname.and_then(|v| v.into_iter().next()),
            groups: mapping.managed(self.memberof_group.iter().map(String::as_str)),
        })
    }

    fn has_mail_in(&self, domain: &str) -> bool {
        let suffix = format!("@{}", domain.trim_start_matches('@'));
        self.mail.iter().any(|m| m.ends_with(&suffix))
    }
}

impl FreeIpaClient {
    pub fn new(
        cfg: &FreeIpa,
        mapping: GroupMapping,
        mail_domain: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let base = if cfg.host.starts_with("http://") || cfg.host.starts_with("https://") {
            cfg.host.clone()
        } else {
            format!("https://{}", cfg.host)
        };
        let base_url = Url::parse(&format!("{}/ipa/", base.trim_end_matches('/')))
            .map_err(|e| DirectoryError::Unavailable(format!("invalid FreeIPA host: {e}")))?;
        let http = Client::builder()
            .user_agent("arthur/0.1")
            .cookie_store(true)
            .danger_accept_invalid_certs(!cfg.verify_tls)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            mapping,
            mail_domain,
        })
    }

    pub fn is_managed(&self, group: &str) -> bool {
        self.mapping.contains_group(group)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DirectoryError> {
        self.base_url
            .join(path)
            .map_err(|e| DirectoryError::Unavailable(format!("invalid FreeIPA URL: {e}")))
    }

    /// Establish a session cookie. The cookie store keeps it for later calls.
    #[instrument(skip_all)]
    pub async fn login(&self) -> Result<(), DirectoryError> {
        let res = self
            .http
            .post(self.endpoint("session/login_password")?)
            .header("Referer", self.base_url.as_str())
            .header("Accept", "text/plain")
            .form(&[("user", self.username.as_str()), ("password", self.password.as_str())])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DirectoryError::Unavailable(format!(
                "FreeIPA login failed {}: {}",
                status, body
            )));
        }
        info!("logged in to FreeIPA");
        Ok(())
    }

    pub fn build_rpc(
        &self,
        method: &str,
        args: Value,
        options: Value,
    ) -> Result<reqwest::Request, DirectoryError> {
        let mut options = match options {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        options.insert("version".into(), Value::String(API_VERSION.into()));
        let body = json!({
            "method": format!("{}/1", method),
            "params": [args, Value::Object(options)],
            "id": 0,
        });
        self.http
            .post(self.endpoint("session/json")?)
            .header("Referer", self.base_url.as_str())
            .header("Accept", "application/json")
            .json(&body)
            .build()
            .map_err(DirectoryError::from)
    }

    async fn rpc(
        &self,
        method: &str,
        args: Value,
        options: Value,
    ) -> Result<Value, DirectoryError> {
        let request = self.build_rpc(method, args.clone(), options.clone())?;
        debug!(method, "sending FreeIPA request");
        let mut res = self.http.execute(request).await?;

        if res.status() == StatusCode::UNAUTHORIZED {
            self.login().await?;
            let request = self.build_rpc(method, args, options)?;
            res = self.http.execute(request).await?;
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DirectoryError::Unavailable(format!(
                "FreeIPA error {}: {}",
                status, body
            )));
        }

        let payload: RpcResponse = res.json().await?;
        if let Some(err) = payload.error {
            return Err(DirectoryError::Rpc {
                method: method.to_string(),
                code: err.code,
                name: err.name,
                message: err.message,
            });
        }
        payload
            .result
            .ok_or_else(|| DirectoryError::Decode(format!("{} returned no result", method)))
    }

    fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, DirectoryError> {
        serde_json::from_value(value)
            .map_err(|e| DirectoryError::Decode(format!("{}: {}", method, e)))
    }

    #[instrument(skip_all)]
    pub async fn find_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let value = self
            .rpc("user_find", json!([]), json!({ "all": true, "sizelimit": 0 }))
            .await?;
        let found: FindResult<IpaUser> = Self::decode("user_find", value)?;
        let users = found
            .result
            .into_iter()
            .filter(|u| match &self.mail_domain {
                Some(domain) => u.has_mail_in(domain),
                None => true,
            })
            .filter_map(|u| u.into_directory_user(&self.mapping))
            .collect::<Vec<_>>();
        debug!(count = users.len(), "fetched directory users");
        Ok(users)
    }

    #[instrument(skip_all)]
    pub async fn find_by_employee_number(
        &self,
        key: &str,
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        let value = self
            .rpc("user_find", json!([]), json!({ "all": true, "employeenumber": key }))
            .await?;
        let found: FindResult<IpaUser> = Self::decode("user_find", value)?;
        Ok(found
            .result
            .into_iter()
            .next()
            .and_then(|u| u.into_directory_user(&self.mapping)))
    }

    /// All groups the user belongs to, managed or not.
    pub async fn user_groups(&self, uid: &str) -> Result<BTreeSet<String>, DirectoryError> {
        let value = self
            .rpc("user_show", json!([uid]), json!({ "all": true }))
            .await
            .map_err(|e| not_found_as(e, uid))?;
        let shown: ShowResult<IpaUser> = Self::decode("user_show", value)?;
        Ok(shown.result.memberof_group.into_iter().collect())
    }

    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn create_user(
        &self,
        uid: &str,
        display_name: &str,
        password: &str,
        employee_number: &str,
    ) -> Result<(), DirectoryError> {
        let result = self
            .rpc(
                "user_add",
                json!([uid]),
                json!({
                    "givenname": display_name,
                    "sn": display_name,
                    "cn": display_name,
                    "displayname": display_name,
                    "userpassword": password,
                    "employeenumber": employee_number,
                }),
            )
            .await;
        match result {
            Ok(_) => {
                info!(uid, "created directory user");
                Ok(())
            }
            Err(DirectoryError::Rpc { code: ERR_DUPLICATE_ENTRY, .. }) => {
                Err(DirectoryError::AlreadyExists(uid.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn deactivate_user(&self, uid: &str) -> Result<(), DirectoryError> {
        match self
            .rpc("user_mod", json!([uid]), json!({ "nsaccountlock": true }))
            .await
        {
            Ok(_) => {
                info!(uid, "locked directory user");
                Ok(())
            }
            // already locked
            Err(DirectoryError::Rpc { code: ERR_EMPTY_MODLIST, .. }) => Ok(()),
            Err(err) => Err(not_found_as(err, uid)),
        }
    }

    pub async fn group_add_member(&self, group: &str, uid: &str) -> Result<(), DirectoryError> {
        self.rpc("group_add_member", json!([group]), json!({ "user": [uid] }))
            .await?;
        info!(group, uid, "added user to group");
        Ok(())
    }

    pub async fn group_remove_member(&self, group: &str, uid: &str) -> Result<(), DirectoryError> {
        self.rpc("group_remove_member", json!([group]), json!({ "user": [uid] }))
            .await?;
        info!(group, uid, "removed user from group");
        Ok(())
    }

    pub async fn group_members(&self, group: &str) -> Result<BTreeSet<String>, DirectoryError> {
        let value = match self.rpc("group_show", json!([group]), json!({})).await {
            Ok(v) => v,
            Err(DirectoryError::Rpc { code: ERR_NOT_FOUND, .. }) => return Ok(BTreeSet::new()),
            Err(err) => return Err(err),
        };
        let shown: ShowResult<IpaGroup> = Self::decode("group_show", value)?;
        Ok(shown.result.member_user.into_iter().collect())
    }
}

fn not_found_as(err: DirectoryError, uid: &str) -> DirectoryError {
    match err {
        DirectoryError::Rpc {
            code: ERR_NOT_FOUND,
            ..
        } => DirectoryError::NotFound(uid.to_string()),
        other => other,
    }
}
