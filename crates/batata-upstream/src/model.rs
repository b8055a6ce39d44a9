//! Model types shared by the pool, the cache and the resolver

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
pub const SERVICE_KEY_SEPARATOR: &str = "@@";

/// One registered instance of a service.
///
/// Instances are snapshots: an update from the registry replaces the whole
/// list they belong to, nothing mutates them in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub instance_id: String,
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub ephemeral: bool,
    pub cluster_name: String,
    pub service_name: String,
    pub metadata: HashMap<String, String>,
}

impl Instance {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            weight: 1.0,
            healthy: true,
            enabled: true,
            ephemeral: true,
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_cluster(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = cluster_name.into();
        self
    }

    /// `host:port`, with IPv6 hosts bracketed.
    pub fn address(&self) -> String {
        join_host_port(&self.ip, self.port)
    }
}

/// Identity of a logical service: `(namespace, group, service)`.
///
/// Components are compared verbatim. The empty namespace is the default
/// namespace and a key of its own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub namespace: String,
    pub group: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
            service: service.into(),
        }
    }
}

impl Display for ServiceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.namespace,
            self.group,
            self.service,
            sep = SERVICE_KEY_SEPARATOR
        )
    }
}

/// Address handed to the proxy for opening an upstream connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DialTarget {
    pub dial: String,
}

impl From<&Instance> for DialTarget {
    fn from(instance: &Instance) -> Self {
        Self {
            dial: instance.address(),
        }
    }
}

impl Display for DialTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dial)
    }
}

/// Join host and port the way dialers expect it.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
