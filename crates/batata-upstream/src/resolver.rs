//! Per-route upstream resolution for the proxy

use std::sync::Arc;

use async_trait::async_trait;
use http::request::Parts;
use tracing::{debug, info, warn};

use crate::cache::{InstanceCache, Selector};
use crate::config::RouteConfig;
use crate::error::{Result, UpstreamError};
use crate::model::{DialTarget, ServiceKey};

/// Source of dial targets, asked once per routing decision.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    async fn get_upstreams(&self, request: &Parts) -> Result<Vec<DialTarget>>;
}

/// Resolves one route's service into dial targets.
pub struct UpstreamResolver {
    route: RouteConfig,
    key: ServiceKey,
    selector: Selector,
    cache: Arc<InstanceCache>,
}

impl UpstreamResolver {
    pub fn new(route: RouteConfig, cache: Arc<InstanceCache>) -> Self {
        let key = route.service_key();
        let selector = Selector::from(&route);
        Self {
            route,
            key,
            selector,
            cache,
        }
    }

    pub fn route(&self) -> &RouteConfig {
        &self.route
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.key
    }

    /// Resolve the route without a request at hand.
    pub async fn resolve(&self) -> Result<Vec<DialTarget>> {
        let resolution = self.cache.resolve(&self.key, &self.selector).await?;

        if let Some(warning) = &resolution.warning {
            // Some records were rejected; the remaining ones are still served.
            warn!(
                route = %self.route.display_name(),
                key = %self.key,
                warning = %warning,
                "Registry instances filtered"
            );
        }

        if resolution.instances.is_empty() {
            return Err(UpstreamError::NoHealthyInstances(self.key.clone()));
        }

        let upstreams: Vec<DialTarget> = resolution
            .instances
            .iter()
            .map(|instance| {
                debug!(target_ip = %instance.ip, port = instance.port, "Discovered registry instance");
                DialTarget::from(instance)
            })
            .collect();

        if resolution.from_cache {
            debug!(key = %self.key, upstreams = upstreams.len(), "Resolved upstreams");
        } else {
            info!(key = %self.key, upstreams = upstreams.len(), "Discovered registry upstreams");
        }
        Ok(upstreams)
    }
}

#[async_trait]
impl UpstreamSource for UpstreamResolver {
    async fn get_upstreams(&self, _request: &Parts) -> Result<Vec<DialTarget>> {
        self.resolve().await
    }
}
