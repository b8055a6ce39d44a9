//! Batata Upstream - registry-backed upstream resolution for reverse proxies
//!
//! This crate provides:
//! - A per-namespace pool of registry clients
//! - An instance cache with at most one subscription per service
//! - Per-route resolvers turning cached instances into dial targets
//! - A Nacos naming client over the v1 Open API

pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod nacos;
pub mod naming;
pub mod pool;
pub mod resolver;

pub use app::UpstreamApp;
pub use cache::{CacheEntry, InstanceCache, Resolution, Selector};
pub use config::{RegistryConfig, RouteConfig};
pub use error::{ClientError, UpstreamError};
pub use model::{DialTarget, Instance, ServiceKey};
pub use nacos::{NacosClientFactory, NacosHttpClient};
pub use naming::{ClientFactory, EventListener, NamingClient, NamingEvent, QueryResponse};
pub use pool::ClientPool;
pub use resolver::{UpstreamResolver, UpstreamSource};
