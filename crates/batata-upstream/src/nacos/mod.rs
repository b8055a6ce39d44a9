//! Nacos naming client over the v1 Open API
//!
//! The HTTP API has no push channel. [`NacosHttpClient::subscribe`] reports
//! [`ClientError::PushUnsupported`] and the cache polls instead.

pub mod model;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::ClientError;
use crate::naming::{ClientFactory, EventListener, NamingClient, QueryResponse};

use self::model::{InstanceListResponse, LoginResponse};

const LOGIN_PATH: &str = "/v1/auth/login";
const INSTANCE_LIST_PATH: &str = "/v1/ns/instance/list";
/// Tokens are renewed this long before they expire, or after half their
/// lifetime when that comes sooner.
const TOKEN_REFRESH_WINDOW: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
struct TokenInfo {
    access_token: String,
    refresh_at: Instant,
}

fn refresh_after(ttl: Duration) -> Duration {
    ttl - TOKEN_REFRESH_WINDOW.min(ttl / 2)
}

/// Naming client for one namespace of a Nacos server.
pub struct NacosHttpClient {
    client: Client,
    base_url: String,
    namespace: String,
    username: String,
    password: String,
    token: RwLock<Option<TokenInfo>>,
}

impl NacosHttpClient {
    /// Create a client without logging in.
    pub fn new(namespace: &str, config: &RegistryConfig) -> Result<Self, ClientError> {
        let base_url = config
            .base_url()
            .map_err(|e| ClientError::Other(e.into()))?
            .as_str()
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .connect_timeout(config.timeout())
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            namespace: namespace.to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            token: RwLock::new(None),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    fn get_token(&self) -> Option<String> {
        self.token.read().as_ref().and_then(|t| {
            if Instant::now() < t.refresh_at {
                Some(t.access_token.clone())
            } else {
                None
            }
        })
    }

    fn set_token(&self, access_token: String, ttl_seconds: i64) {
        let ttl = Duration::from_secs(ttl_seconds.max(0) as u64);
        *self.token.write() = Some(TokenInfo {
            access_token,
            refresh_at: Instant::now() + refresh_after(ttl),
        });
    }

    fn clear_token(&self) {
        *self.token.write() = None;
    }

    /// Log in with the configured credentials and return the new token.
    pub async fn authenticate(&self) -> Result<String, ClientError> {
        let url = self.url(LOGIN_PATH);
        debug!(url = %url, namespace = %self.namespace, "Authenticating with registry");

        let response = self
            .client
            .post(&url)
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(map_send_error)?;

        if !response.status().is_success() {
            return Err(ClientError::AuthFailed(format!(
                "login returned status {}",
                response.status().as_u16()
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ClientError::AuthFailed(format!("invalid login response: {}", e)))?;
        debug!(ttl = login.token_ttl, "Authentication successful");
        self.set_token(login.access_token.clone(), login.token_ttl);
        Ok(login.access_token)
    }

    /// Current access token, logging in again when it is missing or expiring.
    async fn ensure_token(&self) -> Result<Option<String>, ClientError> {
        if !self.has_credentials() {
            return Ok(None);
        }
        if let Some(token) = self.get_token() {
            return Ok(Some(token));
        }
        self.authenticate().await.map(Some)
    }

    async fn query_once(
        &self,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ClientError> {
        let mut params = query.to_vec();
        if let Some(token) = self.ensure_token().await? {
            params.push(("accessToken", token));
        }
        self.client
            .get(self.url(INSTANCE_LIST_PATH))
            .query(&params)
            .send()
            .await
            .map_err(map_send_error)
    }
}

fn map_send_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Http(e)
    }
}

#[async_trait]
impl NamingClient for NacosHttpClient {
    async fn select_instances(
        &self,
        service_name: &str,
        group_name: &str,
        clusters: &[String],
        healthy_only: bool,
    ) -> Result<QueryResponse, ClientError> {
        let mut query: Vec<(&str, String)> = vec![
            ("serviceName", service_name.to_string()),
            ("groupName", group_name.to_string()),
            ("namespaceId", self.namespace.clone()),
            ("healthyOnly", healthy_only.to_string()),
        ];
        if !clusters.is_empty() {
            query.push(("clusters", clusters.join(",")));
        }

        let mut response = self.query_once(&query).await?;
        if response.status() == StatusCode::FORBIDDEN && self.has_credentials() {
            warn!(namespace = %self.namespace, "Access token rejected, logging in again");
            self.clear_token();
            response = self.query_once(&query).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let body: InstanceListResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let (instances, invalid) = body.into_instances();
        if invalid > 0 {
            warn!(
                service = %service_name,
                group = %group_name,
                invalid,
                "Registry returned invalid instance records"
            );
            return Ok(QueryResponse::partial(
                instances,
                format!("{} invalid records", invalid),
            ));
        }
        Ok(QueryResponse::new(instances))
    }

    async fn subscribe(
        &self,
        _service_name: &str,
        _group_name: &str,
        _listener: Arc<dyn EventListener>,
    ) -> Result<(), ClientError> {
        Err(ClientError::PushUnsupported)
    }

    async fn unsubscribe(&self, _service_name: &str, _group_name: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.clear_token();
        Ok(())
    }
}

/// Builds [`NacosHttpClient`]s for the pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct NacosClientFactory;

#[async_trait]
impl ClientFactory for NacosClientFactory {
    async fn create_client(
        &self,
        namespace: &str,
        config: &RegistryConfig,
    ) -> Result<Arc<dyn NamingClient>, ClientError> {
        let client = NacosHttpClient::new(namespace, config)?;

        // The server may not be reachable yet; ensure_token retries on demand.
        if client.has_credentials()
            && let Err(e) = client.authenticate().await
        {
            warn!(namespace = %namespace, error = %e, "Initial authentication failed (will retry on demand)");
        }

        Ok(Arc::new(client))
    }
}
