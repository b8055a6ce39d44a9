//! Application object owning the pool, the cache and the subscriptions

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::{InstanceCache, Selector};
use crate::config::{RegistryConfig, RouteConfig};
use crate::error::Result;
use crate::model::{Instance, ServiceKey};
use crate::naming::ClientFactory;
use crate::pool::ClientPool;
use crate::resolver::UpstreamResolver;

/// Time `stop` waits for subscription listeners to wind down.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Registry-backed upstream provider, built once at startup and shared by
/// every route resolver.
pub struct UpstreamApp {
    config: RegistryConfig,
    cache: Arc<InstanceCache>,
}

impl UpstreamApp {
    /// Connect one client per configured namespace.
    pub async fn start(config: RegistryConfig, factory: &dyn ClientFactory) -> Result<Self> {
        let pool = Arc::new(ClientPool::connect(&config, factory).await?);
        let cache = Arc::new(InstanceCache::with_timeout(pool, config.timeout()));
        info!(namespaces = ?cache.pool().namespaces(), "Upstream app started");
        Ok(Self { config, cache })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<InstanceCache> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        self.cache.pool()
    }

    /// Healthy, routable instances of a service.
    pub async fn select_instances(
        &self,
        service_name: &str,
        group_name: &str,
        clusters: &[String],
        namespace: &str,
    ) -> Result<Vec<Instance>> {
        let key = ServiceKey::new(namespace, group_name, service_name);
        let selector = Selector {
            clusters: clusters.to_vec(),
            ..Default::default()
        };
        let resolution = self.cache.resolve(&key, &selector).await?;
        Ok(resolution.instances)
    }

    /// Resolver for one proxied route.
    pub fn resolver(&self, route: RouteConfig) -> UpstreamResolver {
        UpstreamResolver::new(route, self.cache.clone())
    }

    /// Stop the listeners and close every registry client.
    pub async fn stop(&self) -> Result<()> {
        self.stop_with_grace(DEFAULT_SHUTDOWN_GRACE).await
    }

    /// Listeners still running after `grace` are abandoned rather than
    /// awaited; the clients are closed either way. Afterwards, resolving a
    /// key that is not cached fails with [`UpstreamError::ShuttingDown`]
    /// while cached keys keep answering from their last snapshot.
    ///
    /// [`UpstreamError::ShuttingDown`]: crate::error::UpstreamError::ShuttingDown
    pub async fn stop_with_grace(&self, grace: Duration) -> Result<()> {
        info!("Closing registry connections");
        let drained = self.cache.subscriptions().shutdown(grace).await;
        self.cache.pool().shutdown().await;
        info!(listeners_drained = drained, "Upstream app stopped");
        Ok(())
    }
}
