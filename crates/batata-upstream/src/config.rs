//! Registry and route configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, UpstreamError};
use crate::model::{DEFAULT_GROUP, ServiceKey};

pub const DEFAULT_SERVER_PORT: u16 = 8848;
pub const DEFAULT_CONTEXT_PATH: &str = "/nacos";
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_REFRESH_SECS: u64 = 60;

fn default_ip_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_context_path() -> String {
    DEFAULT_CONTEXT_PATH.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_refresh_secs() -> u64 {
    DEFAULT_REFRESH_SECS
}

fn default_true() -> bool {
    true
}

/// Connection settings shared by every namespace client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_ip_addr")]
    pub ip_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_context_path")]
    pub context_path: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Upper bound for a single registry query.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ip_addr: default_ip_addr(),
            port: DEFAULT_SERVER_PORT,
            context_path: default_context_path(),
            namespaces: Vec::new(),
            username: String::new(),
            password: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl RegistryConfig {
    pub fn new(ip_addr: &str, port: u16) -> Self {
        Self {
            ip_addr: ip_addr.to_string(),
            port,
            ..Default::default()
        }
    }

    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Namespaces to build clients for: deduplicated in configuration order,
    /// or the default namespace alone when none is configured.
    pub fn effective_namespaces(&self) -> Vec<String> {
        if self.namespaces.is_empty() {
            return vec![String::new()];
        }
        let mut namespaces: Vec<String> = Vec::with_capacity(self.namespaces.len());
        for namespace in &self.namespaces {
            if !namespaces.contains(namespace) {
                namespaces.push(namespace.clone());
            }
        }
        namespaces
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// Base URL of the registry's HTTP API, context path included.
    pub fn base_url(&self) -> Result<Url> {
        let context_path = self.context_path.trim_end_matches('/');
        let context_path = if context_path.is_empty() || context_path.starts_with('/') {
            context_path.to_string()
        } else {
            format!("/{}", context_path)
        };
        let host = if self.ip_addr.contains(':') && !self.ip_addr.starts_with('[') {
            format!("[{}]", self.ip_addr)
        } else {
            self.ip_addr.clone()
        };
        let raw = format!("http://{}:{}{}", host, self.port, context_path);
        Url::parse(&raw)
            .map_err(|e| UpstreamError::InvalidConfig(format!("server address '{}': {}", raw, e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.ip_addr.trim().is_empty() {
            return Err(UpstreamError::InvalidConfig(
                "registry ip_addr is empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(UpstreamError::InvalidConfig(
                "registry port must be greater than 0".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(UpstreamError::InvalidConfig(
                "registry timeout_ms must be greater than 0".to_string(),
            ));
        }
        self.base_url().map(|_| ())
    }
}

/// Settings of one proxied route. Immutable once provisioned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Display name; defaults to the service name.
    #[serde(default)]
    pub name: Option<String>,
    pub service_name: String,
    #[serde(default = "default_group")]
    pub group_name: String,
    #[serde(default)]
    pub namespace: String,
    /// Poll interval used only when the registry client cannot push.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    /// Only route to instances of these clusters; empty routes to all.
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default = "default_true")]
    pub healthy_only: bool,
}

impl RouteConfig {
    pub fn new(service_name: &str) -> Self {
        Self {
            name: None,
            service_name: service_name.to_string(),
            group_name: default_group(),
            namespace: String::new(),
            refresh_secs: DEFAULT_REFRESH_SECS,
            clusters: Vec::new(),
            healthy_only: true,
        }
    }

    pub fn with_group(mut self, group_name: &str) -> Self {
        self.group_name = group_name.to_string();
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_clusters(mut self, clusters: Vec<String>) -> Self {
        self.clusters = clusters;
        self
    }

    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh_secs = refresh.as_secs().max(1);
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.service_name)
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(&self.namespace, &self.group_name, &self.service_name)
    }

    pub fn refresh(&self) -> Duration {
        if self.refresh_secs == 0 {
            Duration::from_secs(DEFAULT_REFRESH_SECS)
        } else {
            Duration::from_secs(self.refresh_secs)
        }
    }
}
