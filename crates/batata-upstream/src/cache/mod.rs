//! Instance cache keyed by `(namespace, group, service)`
//!
//! Reads are served from the cache. A miss queries the namespace's registry
//! client once, stores the filtered answer and makes sure exactly one
//! subscription keeps the entry current from then on.

pub mod subscription;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::{DEFAULT_REFRESH_SECS, DEFAULT_TIMEOUT_MS, RouteConfig};
use crate::error::{ClientError, Result, UpstreamError};
use crate::model::{Instance, ServiceKey};
use crate::naming::NamingClient;
use crate::pool::ClientPool;

use self::subscription::{SubscriptionRegistry, SubscriptionTask};

pub(crate) type EntryMap = DashMap<ServiceKey, CacheEntry>;

/// Cached instance list of one service.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub instances: Arc<[Instance]>,
    pub last_refreshed: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances: instances.into(),
            last_refreshed: Utc::now(),
        }
    }
}

/// How a resolution filters and keeps its entry fresh.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    pub healthy_only: bool,
    /// Cluster names to keep; empty keeps every cluster.
    pub clusters: Vec<String>,
    /// Poll interval for clients without push.
    pub refresh: Duration,
}

impl Default for Selector {
    fn default() -> Self {
        Self {
            healthy_only: true,
            clusters: Vec::new(),
            refresh: Duration::from_secs(DEFAULT_REFRESH_SECS),
        }
    }
}

impl From<&RouteConfig> for Selector {
    fn from(route: &RouteConfig) -> Self {
        Self {
            healthy_only: route.healthy_only,
            clusters: route.clusters.clone(),
            refresh: route.refresh(),
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub instances: Vec<Instance>,
    /// Set when the registry rejected some records but returned others.
    pub warning: Option<String>,
    pub from_cache: bool,
}

/// Instances fetched from the registry, already filtered.
pub(crate) struct Fetched {
    pub instances: Vec<Instance>,
    pub warning: Option<String>,
}

/// Keep the instances that may receive traffic, in order.
///
/// Weight 0 drains an instance. Unhealthy and disabled instances are dropped
/// as well when `healthy_only` is set, since pushed lists carry them.
pub fn filter_routable(instances: Vec<Instance>, healthy_only: bool) -> Vec<Instance> {
    instances
        .into_iter()
        .filter(|instance| instance.weight > 0.0)
        .filter(|instance| !healthy_only || (instance.healthy && instance.enabled))
        .collect()
}

/// Keep the instances of the given clusters; an empty filter keeps all.
pub fn select_clusters(instances: &[Instance], clusters: &[String]) -> Vec<Instance> {
    instances
        .iter()
        .filter(|instance| clusters.is_empty() || clusters.contains(&instance.cluster_name))
        .cloned()
        .collect()
}

pub(crate) fn install(entries: &EntryMap, key: &ServiceKey, instances: Vec<Instance>) {
    entries.insert(key.clone(), CacheEntry::new(instances));
}

/// Query `client` for `key` within `timeout` and filter the answer.
pub(crate) async fn fetch(
    client: &dyn NamingClient,
    key: &ServiceKey,
    healthy_only: bool,
    timeout: Duration,
) -> Result<Fetched> {
    let query = client.select_instances(&key.service, &key.group, &[], healthy_only);
    let response = match tokio::time::timeout(timeout, query).await {
        Ok(Ok(response)) => response,
        Ok(Err(source)) => {
            return Err(UpstreamError::RegistryUnavailable {
                key: key.clone(),
                source,
            });
        }
        Err(_) => {
            return Err(UpstreamError::RegistryUnavailable {
                key: key.clone(),
                source: ClientError::Timeout,
            });
        }
    };

    if let Some(message) = &response.invalid
        && response.instances.is_empty()
    {
        return Err(UpstreamError::InvalidRecords {
            key: key.clone(),
            message: message.clone(),
        });
    }

    let total = response.instances.len();
    let instances = filter_routable(response.instances, healthy_only);
    debug!(
        key = %key,
        total,
        routable = instances.len(),
        "Fetched instances from registry"
    );

    Ok(Fetched {
        instances,
        warning: response.invalid,
    })
}

/// Process-lifetime cache of service instances.
pub struct InstanceCache {
    pool: Arc<ClientPool>,
    entries: Arc<EntryMap>,
    subscriptions: SubscriptionRegistry,
    query_timeout: Duration,
}

impl InstanceCache {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self::with_timeout(pool, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }

    pub fn with_timeout(pool: Arc<ClientPool>, query_timeout: Duration) -> Self {
        Self {
            pool,
            entries: Arc::new(DashMap::new()),
            subscriptions: SubscriptionRegistry::new(),
            query_timeout,
        }
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Resolve the instances of `key`, from the cache when possible.
    pub async fn resolve(&self, key: &ServiceKey, selector: &Selector) -> Result<Resolution> {
        let cached = self.entries.get(key).map(|entry| entry.instances.clone());
        if let Some(instances) = cached {
            debug!(key = %key, instances = instances.len(), "Resolved instances from cache");
            return Ok(Resolution {
                instances: self.select(&instances, selector),
                warning: None,
                from_cache: true,
            });
        }

        let client = self.pool.client_for(&key.namespace)?;
        let fetched = fetch(client.as_ref(), key, selector.healthy_only, self.query_timeout).await?;

        // Racing callers may each install their own snapshot; last writer wins.
        install(&self.entries, key, fetched.instances.clone());
        info!(key = %key, instances = fetched.instances.len(), "Set instance cache");

        self.subscriptions.ensure_subscribed(SubscriptionTask {
            key: key.clone(),
            client,
            entries: self.entries.clone(),
            healthy_only: selector.healthy_only,
            refresh: selector.refresh,
            query_timeout: self.query_timeout,
        });

        Ok(Resolution {
            instances: self.select(&fetched.instances, selector),
            warning: fetched.warning,
            from_cache: false,
        })
    }

    /// Query the registry for `key` and replace its entry.
    ///
    /// On failure the existing entry stays in place.
    pub async fn refresh(&self, key: &ServiceKey, selector: &Selector) -> Result<Resolution> {
        let client = self.pool.client_for(&key.namespace)?;
        let fetched = fetch(client.as_ref(), key, selector.healthy_only, self.query_timeout).await?;
        install(&self.entries, key, fetched.instances.clone());

        Ok(Resolution {
            instances: self.select(&fetched.instances, selector),
            warning: fetched.warning,
            from_cache: false,
        })
    }

    pub fn entry(&self, key: &ServiceKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn select(&self, instances: &[Instance], selector: &Selector) -> Vec<Instance> {
        let instances = select_clusters(instances, &selector.clusters);
        if selector.healthy_only {
            filter_routable(instances, true)
        } else {
            instances
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted(ip: &str, weight: f64) -> Instance {
        Instance::new(ip, 8080).with_weight(weight)
    }

    #[test]
    fn test_filter_drops_zero_weight_in_order() {
        let instances = vec![
            weighted("10.0.0.1", 0.0),
            weighted("10.0.0.2", 5.0),
            weighted("10.0.0.3", 1.0),
        ];
        let filtered = filter_routable(instances, true);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].ip, "10.0.0.2");
        assert_eq!(filtered[1].ip, "10.0.0.3");
    }

    #[test]
    fn test_filter_healthy_only() {
        let mut unhealthy = weighted("10.0.0.1", 1.0);
        unhealthy.healthy = false;
        let mut disabled = weighted("10.0.0.2", 1.0);
        disabled.enabled = false;
        let ok = weighted("10.0.0.3", 1.0);

        let instances = vec![unhealthy, disabled, ok];
        assert_eq!(filter_routable(instances.clone(), true).len(), 1);
        assert_eq!(filter_routable(instances, false).len(), 3);
    }

    #[test]
    fn test_filter_everything_drained() {
        let instances = vec![weighted("10.0.0.1", 0.0), weighted("10.0.0.2", 0.0)];
        assert!(filter_routable(instances, true).is_empty());
    }

    #[test]
    fn test_select_clusters() {
        let instances = vec![
            weighted("10.0.0.1", 1.0).with_cluster("DEFAULT"),
            weighted("10.0.0.2", 1.0).with_cluster("BJ"),
        ];
        assert_eq!(select_clusters(&instances, &[]).len(), 2);

        let selected = select_clusters(&instances, &["BJ".to_string()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].ip, "10.0.0.2");
    }

    #[test]
    fn test_selector_from_route() {
        let route = RouteConfig::new("orders")
            .with_clusters(vec!["DEFAULT".to_string()])
            .with_refresh(Duration::from_secs(30));
        let selector = Selector::from(&route);
        assert!(selector.healthy_only);
        assert_eq!(selector.clusters, vec!["DEFAULT"]);
        assert_eq!(selector.refresh, Duration::from_secs(30));
    }
}
