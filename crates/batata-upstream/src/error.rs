//! Error types for registry clients and upstream resolution

use crate::model::ServiceKey;

/// Error raised by a registry client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("auth failed: {0}")]
    AuthFailed(String),

    #[error("server returned error: status={status}, message={message}")]
    ServerError { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("request timeout")]
    Timeout,

    #[error("push subscription not supported by this client")]
    PushUnsupported,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Error returned by the pool, the cache and the resolver.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("registry client for namespace '{0}' not found")]
    NamespaceNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("create registry client for namespace '{namespace}' failed: {source}")]
    ClientCreation {
        namespace: String,
        #[source]
        source: ClientError,
    },

    #[error("select instances {key} failed: {source}")]
    RegistryUnavailable {
        key: ServiceKey,
        #[source]
        source: ClientError,
    },

    #[error("select instances {key} returned only invalid records: {message}")]
    InvalidRecords { key: ServiceKey, message: String },

    #[error("no healthy instances for {0}")]
    NoHealthyInstances(ServiceKey),

    #[error("upstream app is shutting down")]
    ShuttingDown,
}

impl UpstreamError {
    /// Configuration mistakes; retrying does not help.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            UpstreamError::NamespaceNotFound(_)
                | UpstreamError::InvalidConfig(_)
                | UpstreamError::ClientCreation { .. }
        )
    }

    /// The registry could not be reached or answered garbage.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            UpstreamError::RegistryUnavailable { .. } | UpstreamError::InvalidRecords { .. }
        )
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self, UpstreamError::ShuttingDown)
    }

    /// The registry answered, but nothing is routable.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, UpstreamError::NoHealthyInstances(_))
    }
}

pub type Result<T> = std::result::Result<T, UpstreamError>;
