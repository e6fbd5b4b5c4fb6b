use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument};

use super::DirectoryError;
use crate::config::Keycloak;

/// Admin REST client for the Keycloak realm that fronts the directory.
#[derive(Clone)]
pub struct KeycloakClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    realm: String,
}

impl fmt::Debug for KeycloakClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeycloakClient")
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct KeycloakUser {
    id: String,
}

impl KeycloakClient {
    pub fn new(cfg: &Keycloak, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(&format!("{}/", cfg.address.trim_end_matches('/')))
            .map_err(|e| DirectoryError::Unavailable(format!("invalid Keycloak address: {e}")))?;
        let http = Client::builder()
            .user_agent("arthur/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            realm: cfg.realm.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DirectoryError> {
        self.base_url
            .join(path)
            .map_err(|e| DirectoryError::Unavailable(format!("invalid Keycloak URL: {e}")))
    }

    /// Admin token from the master realm's `admin-cli` client.
    async fn admin_token(&self) -> Result<String, DirectoryError> {
        let res = self
            .http
            .post(self.endpoint("realms/master/protocol/openid-connect/token")?)
            .form(&[
                ("grant_type", "password"),
                ("client_id", "admin-cli"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DirectoryError::Unavailable(format!(
                "keycloak token error {}: {}",
                status, body
            )));
        }
        let token: TokenResponse = res.json().await?;
        Ok(token.access_token)
    }

    async fn user_id(&self, token: &str, username: &str) -> Result<String, DirectoryError> {
        let mut url = self.endpoint(&format!("admin/realms/{}/users", self.realm))?;
        url.query_pairs_mut()
            .append_pair("username", username)
            .append_pair("exact", "true");
        let res = self.http.get(url).bearer_auth(token).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DirectoryError::Unavailable(format!(
                "keycloak user lookup error {}: {}",
                status, body
            )));
        }
        let users: Vec<KeycloakUser> = res.json().await?;
        users
            .into_iter()
            .next()
            .map(|u| u.id)
            .ok_or_else(|| DirectoryError::NotFound(username.to_string()))
    }

    #[instrument(skip_all, fields(uid = %username))]
    pub async fn set_temporary_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(), DirectoryError> {
        let token = self.admin_token().await?;
        let user_id = self.user_id(&token, username).await?;
        let url = self.endpoint(&format!(
            "admin/realms/{}/users/{}/reset-password",
            self.realm, user_id
        ))?;
        let res = self
            .http
            .put(url)
            .bearer_auth(&token)
            .json(&json!({ "type": "password", "value": password, "temporary": true }))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DirectoryError::Unavailable(format!(
                "keycloak reset-password error {}: {}",
                status, body
            )));
        }
        info!(username, "forced password reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(base: &str) -> KeycloakClient {
        let cfg = Keycloak {
            address: base.to_string(),
            username: "kingarthur".into(),
            password: "secret".into(),
            realm: "pydis".into(),
        };
        KeycloakClient::new(&cfg, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn reset_sets_temporary_password() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/realms/master/protocol/openid-connect/token")
                .body_contains("client_id=admin-cli");
            then.status(200).json_body(json!({ "access_token": "tok" }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/admin/realms/pydis/users")
                .query_param("username", "alice")
                .header("Authorization", "Bearer tok");
            then.status(200).json_body(json!([{ "id": "kc-1", "username": "alice" }]));
        });
        let reset = server.mock(|when, then| {
            when.method(PUT)
                .path("/admin/realms/pydis/users/kc-1/reset-password")
                .json_body(json!({ "type": "password", "value": "pw", "temporary": true }));
            then.status(204);
        });

        client(&server.base_url())
            .set_temporary_password("alice", "pw")
            .await
            .unwrap();
        reset.assert();
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/realms/master/protocol/openid-connect/token");
            then.status(200).json_body(json!({ "access_token": "tok" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/admin/realms/pydis/users");
            then.status(200).json_body(json!([]));
        });

        let err = client(&server.base_url())
            .set_temporary_password("ghost", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(uid) if uid == "ghost"));
    }
}
