use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

pub const LDAP_AUTH_MODULE: &str = "ldap";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Team {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TeamSearch {
    teams: Vec<Team>,
}

/// A team member or org user. Both endpoints share these fields.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GrafanaUser {
    #[serde(rename = "userId")]
    pub user_id: u64,
    pub login: String,
    #[serde(default)]
    pub auth_module: Option<String>,
}

impl GrafanaUser {
    pub fn is_ldap(&self) -> bool {
        self.auth_module.as_deref() == Some(LDAP_AUTH_MODULE)
    }
}

#[async_trait]
pub trait GrafanaService: Send + Sync {
    async fn list_teams(&self) -> Result<Vec<Team>>;
    async fn team_members(&self, team_id: u64) -> Result<Vec<GrafanaUser>>;
    async fn add_team_member(&self, team_id: u64, user_id: u64) -> Result<()>;
    async fn remove_team_member(&self, team_id: u64, user_id: u64) -> Result<()>;
    async fn org_users(&self) -> Result<Vec<GrafanaUser>>;
}

#[derive(Clone)]
pub struct GrafanaClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for GrafanaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrafanaClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GrafanaClient {
    pub fn new(url: &str, token: String, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&format!("{}/", url.trim_end_matches('/')))
            .with_context(|| format!("invalid grafana url {}", url))?;
        let http = Client::builder()
            .user_agent("arthur/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let endpoint = self.base_url.join(path)?;
        let mut builder = self.http.request(method, endpoint).bearer_auth(&self.token);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.build()?)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let request = self.build_request(method, path, body)?;
        debug!(method = %request.method(), url = %request.url(), "sending grafana request");
        let res = self.http.execute(request).await?;
        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by grafana: {}", body);
            return Err(anyhow!("received 429 from grafana: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("grafana error {}: {}", status, body));
        }
        Ok(res)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let res = self.send(Method::GET, path, None).await?;
        res.json()
            .await
            .with_context(|| format!("invalid grafana response for {}", path))
    }
}

#[async_trait]
impl GrafanaService for GrafanaClient {
    async fn list_teams(&self) -> Result<Vec<Team>> {
        let search: TeamSearch = self.get("api/teams/search?perpage=1000").await?;
        Ok(search.teams)
    }

    async fn team_members(&self, team_id: u64) -> Result<Vec<GrafanaUser>> {
        self.get(&format!("api/teams/{}/members", team_id)).await
    }

    async fn add_team_member(&self, team_id: u64, user_id: u64) -> Result<()> {
        let body = json!({ "userId": user_id });
        self.send(Method::POST, &format!("api/teams/{}/members", team_id), Some(&body))
            .await?;
        Ok(())
    }

    async fn remove_team_member(&self, team_id: u64, user_id: u64) -> Result<()> {
        self.send(
            Method::DELETE,
            &format!("api/teams/{}/members/{}", team_id, user_id),
            None,
        )
        .await?;
        Ok(())
    }

    async fn org_users(&self) -> Result<Vec<GrafanaUser>> {
        self.get("api/org/users/lookup").await
    }
}
