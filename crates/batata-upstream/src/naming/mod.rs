//! Registry client capability consumed by the pool and the cache
//!
//! A [`NamingClient`] is one connection to the registry scoped to one
//! namespace. [`ClientFactory`] builds them when the pool starts.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RegistryConfig;
use crate::error::ClientError;
use crate::model::Instance;

/// Instance list pushed for one subscribed service.
#[derive(Clone, Debug)]
pub struct NamingEvent {
    /// Name as the registry reports it, possibly `group@@service`.
    pub service_name: String,
    pub group_name: String,
    pub clusters: String,
    pub instances: Vec<Instance>,
}

/// Callback target of [`NamingClient::subscribe`].
///
/// Invoked from the client's delivery task, so it must return quickly.
pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, event: Result<NamingEvent, ClientError>);
}

/// Answer to an instance query.
///
/// `invalid` describes records the client rejected while decoding the
/// answer. The remaining `instances` are still usable.
#[derive(Clone, Debug, Default)]
pub struct QueryResponse {
    pub instances: Vec<Instance>,
    pub invalid: Option<String>,
}

impl QueryResponse {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances,
            invalid: None,
        }
    }

    pub fn partial(instances: Vec<Instance>, invalid: impl Into<String>) -> Self {
        Self {
            instances,
            invalid: Some(invalid.into()),
        }
    }
}

/// Connection to the service registry for a single namespace.
#[async_trait]
pub trait NamingClient: Send + Sync + 'static {
    /// Query the current instances of a service.
    async fn select_instances(
        &self,
        service_name: &str,
        group_name: &str,
        clusters: &[String],
        healthy_only: bool,
    ) -> Result<QueryResponse, ClientError>;

    /// Register `listener` for instance changes of a service.
    ///
    /// Returns [`ClientError::PushUnsupported`] when the client has no push
    /// channel.
    async fn subscribe(
        &self,
        service_name: &str,
        group_name: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), ClientError>;

    async fn unsubscribe(&self, service_name: &str, group_name: &str) -> Result<(), ClientError>;

    /// Release the underlying connection.
    async fn shutdown(&self) -> Result<(), ClientError>;
}

/// Builds a [`NamingClient`] for one namespace.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create_client(
        &self,
        namespace: &str,
        config: &RegistryConfig,
    ) -> Result<Arc<dyn NamingClient>, ClientError>;
}
