//! Counting stub registry shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use batata_upstream::{
    ClientError, ClientFactory, EventListener, Instance, NamingClient, NamingEvent,
    QueryResponse, RegistryConfig,
};

/// How the stub answers `subscribe`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Push {
    Supported,
    Unsupported,
    Failing,
}

/// What the stub answers to `select_instances`.
#[derive(Clone, Debug)]
pub enum Answer {
    Instances(Vec<Instance>),
    Partial(Vec<Instance>, String),
    Unavailable,
}

pub struct StubClient {
    pub namespace: String,
    answer: Mutex<Answer>,
    query_delay: Mutex<Duration>,
    push: Push,
    listeners: Mutex<HashMap<(String, String), Arc<dyn EventListener>>>,
    pub queries: AtomicUsize,
    pub subscribes: AtomicUsize,
    pub unsubscribes: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl StubClient {
    pub fn new(namespace: &str, push: Push) -> Self {
        Self {
            namespace: namespace.to_string(),
            answer: Mutex::new(Answer::Instances(Vec::new())),
            query_delay: Mutex::new(Duration::ZERO),
            push,
            listeners: Mutex::new(HashMap::new()),
            queries: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn answer(&self, answer: Answer) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn delay(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = delay;
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Deliver a push the way the registry would.
    pub fn push(&self, service: &str, group: &str, instances: Vec<Instance>) -> bool {
        let listener = self
            .listeners
            .lock()
            .unwrap()
            .get(&(service.to_string(), group.to_string()))
            .cloned();
        match listener {
            Some(listener) => {
                listener.on_event(Ok(NamingEvent {
                    service_name: format!("{}@@{}", group, service),
                    group_name: group.to_string(),
                    clusters: String::new(),
                    instances,
                }));
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl NamingClient for StubClient {
    async fn select_instances(
        &self,
        _service_name: &str,
        _group_name: &str,
        _clusters: &[String],
        _healthy_only: bool,
    ) -> Result<QueryResponse, ClientError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.query_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let answer = self.answer.lock().unwrap().clone();
        match answer {
            Answer::Instances(instances) => Ok(QueryResponse::new(instances)),
            Answer::Partial(instances, message) => Ok(QueryResponse::partial(instances, message)),
            Answer::Unavailable => Err(ClientError::ServerError {
                status: 503,
                message: "registry down".to_string(),
            }),
        }
    }

    async fn subscribe(
        &self,
        service_name: &str,
        group_name: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), ClientError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        match self.push {
            Push::Supported => {}
            Push::Unsupported => return Err(ClientError::PushUnsupported),
            Push::Failing => {
                return Err(ClientError::ServerError {
                    status: 503,
                    message: "subscribe rejected".to_string(),
                });
            }
        }
        self.listeners
            .lock()
            .unwrap()
            .insert((service_name.to_string(), group_name.to_string()), listener);
        Ok(())
    }

    async fn unsubscribe(&self, service_name: &str, group_name: &str) -> Result<(), ClientError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap()
            .remove(&(service_name.to_string(), group_name.to_string()));
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out one [`StubClient`] per namespace.
pub struct StubFactory {
    push: Push,
    fail_namespace: Option<String>,
    clients: Mutex<HashMap<String, Arc<StubClient>>>,
}

impl StubFactory {
    pub fn new() -> Self {
        Self {
            push: Push::Supported,
            fail_namespace: None,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn without_push() -> Self {
        Self {
            push: Push::Unsupported,
            ..Self::new()
        }
    }

    pub fn failing_subscribe() -> Self {
        Self {
            push: Push::Failing,
            ..Self::new()
        }
    }

    pub fn failing_on(namespace: &str) -> Self {
        Self {
            fail_namespace: Some(namespace.to_string()),
            ..Self::new()
        }
    }

    pub fn client(&self, namespace: &str) -> Arc<StubClient> {
        self.clients
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .expect("client was created")
    }

    pub fn created(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

#[async_trait]
impl ClientFactory for StubFactory {
    async fn create_client(
        &self,
        namespace: &str,
        _config: &RegistryConfig,
    ) -> Result<Arc<dyn NamingClient>, ClientError> {
        if self.fail_namespace.as_deref() == Some(namespace) {
            return Err(ClientError::AuthFailed("bad credentials".to_string()));
        }
        let client = Arc::new(StubClient::new(namespace, self.push));
        self.clients
            .lock()
            .unwrap()
            .insert(namespace.to_string(), client.clone());
        Ok(client)
    }
}

pub fn instance(ip: &str, port: u16, weight: f64) -> Instance {
    Instance::new(ip, port).with_weight(weight)
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
