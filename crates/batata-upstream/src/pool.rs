//! Per-namespace registry client pool

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{error, info};

use crate::config::RegistryConfig;
use crate::error::{Result, UpstreamError};
use crate::naming::{ClientFactory, NamingClient};

/// One registry client per configured namespace.
///
/// Built once at start; lookups afterwards only take the read lock.
pub struct ClientPool {
    clients: RwLock<HashMap<String, Arc<dyn NamingClient>>>,
    closed: AtomicBool,
}

impl ClientPool {
    /// Create a client for every namespace in `config`.
    ///
    /// Fails as a whole if any single client cannot be built.
    pub async fn connect(config: &RegistryConfig, factory: &dyn ClientFactory) -> Result<Self> {
        config.validate()?;

        let namespaces = config.effective_namespaces();
        info!(
            server = %format!("{}:{}", config.ip_addr, config.port),
            namespaces = ?namespaces,
            "Connecting to registry"
        );

        let mut clients: HashMap<String, Arc<dyn NamingClient>> =
            HashMap::with_capacity(namespaces.len());
        for namespace in namespaces {
            match factory.create_client(&namespace, config).await {
                Ok(client) => {
                    info!(namespace = %namespace, "Created registry client");
                    clients.insert(namespace, client);
                }
                Err(e) => {
                    error!(namespace = %namespace, error = %e, "Failed to create registry client");
                    shutdown_all(clients.drain().collect()).await;
                    return Err(UpstreamError::ClientCreation {
                        namespace,
                        source: e,
                    });
                }
            }
        }

        Ok(Self {
            clients: RwLock::new(clients),
            closed: AtomicBool::new(false),
        })
    }

    /// Client bound to `namespace`.
    ///
    /// Fails with [`UpstreamError::ShuttingDown`] once [`shutdown`](Self::shutdown) ran.
    pub fn client_for(&self, namespace: &str) -> Result<Arc<dyn NamingClient>> {
        if self.is_closed() {
            return Err(UpstreamError::ShuttingDown);
        }
        self.clients
            .read()
            .get(namespace)
            .cloned()
            .ok_or_else(|| UpstreamError::NamespaceNotFound(namespace.to_string()))
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.clients.read().keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Remove every client from the pool and shut it down.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let clients: Vec<(String, Arc<dyn NamingClient>)> =
            self.clients.write().drain().collect();
        shutdown_all(clients).await;
    }
}

async fn shutdown_all(clients: Vec<(String, Arc<dyn NamingClient>)>) {
    for (namespace, client) in clients {
        match client.shutdown().await {
            Ok(()) => info!(namespace = %namespace, "Closed registry client"),
            Err(e) => {
                error!(namespace = %namespace, error = %e, "Failed to close registry client")
            }
        }
    }
}
