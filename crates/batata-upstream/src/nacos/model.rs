//! Nacos v1 Open API wire types

use std::collections::HashMap;

use serde::Deserialize;

use crate::model::Instance;

/// Response of `GET /v1/ns/instance/list`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceListResponse {
    pub name: String,
    pub group_name: String,
    pub clusters: String,
    pub cache_millis: i64,
    pub hosts: Vec<serde_json::Value>,
}

/// Host record as the server sends it. Ports arrive as signed integers.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostRecord {
    pub instance_id: String,
    pub ip: String,
    pub port: i64,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub ephemeral: bool,
    pub cluster_name: String,
    pub service_name: String,
    pub metadata: HashMap<String, String>,
}

impl HostRecord {
    pub fn into_instance(self) -> Option<Instance> {
        if self.ip.trim().is_empty() {
            return None;
        }
        let port = u16::try_from(self.port).ok().filter(|port| *port > 0)?;
        if !self.weight.is_finite() || self.weight < 0.0 {
            return None;
        }
        Some(Instance {
            instance_id: self.instance_id,
            ip: self.ip,
            port,
            weight: self.weight,
            healthy: self.healthy,
            enabled: self.enabled,
            ephemeral: self.ephemeral,
            cluster_name: self.cluster_name,
            service_name: self.service_name,
            metadata: self.metadata,
        })
    }
}

impl InstanceListResponse {
    /// Decode the host records, counting the ones that are unusable.
    pub fn into_instances(self) -> (Vec<Instance>, usize) {
        let mut invalid = 0;
        let mut instances = Vec::with_capacity(self.hosts.len());
        for host in self.hosts {
            match serde_json::from_value::<HostRecord>(host)
                .ok()
                .and_then(HostRecord::into_instance)
            {
                Some(instance) => instances.push(instance),
                None => invalid += 1,
            }
        }
        (instances, invalid)
    }
}

/// Response of `POST /v1/auth/login`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl: i64,
}

fn default_token_ttl() -> i64 {
    18000
}
