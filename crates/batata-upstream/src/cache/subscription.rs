//! At-most-one subscription per service key
//!
//! The first resolver of a key wins an atomic insert into the marker set and
//! spawns the listener task; everybody else returns without spawning. Tasks
//! run on a [`TaskTracker`] so shutdown can cancel and await them.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::ClientError;
use crate::model::{SERVICE_KEY_SEPARATOR, ServiceKey};
use crate::naming::{EventListener, NamingClient, NamingEvent};

use super::{EntryMap, fetch, filter_routable, install};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Active subscriptions and the task group their listeners run in.
pub struct SubscriptionRegistry {
    active: DashSet<ServiceKey>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            active: DashSet::new(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_subscribed(&self, key: &ServiceKey) -> bool {
        self.active.contains(key)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Spawn the listener for `task.key` unless one already exists.
    ///
    /// Returns `true` for the single caller that spawned it.
    pub(crate) fn ensure_subscribed(&self, task: SubscriptionTask) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if !self.active.insert(task.key.clone()) {
            return false;
        }

        let cancel = self.cancel.child_token();
        self.tracker.spawn(task.run(cancel));
        true
    }

    /// Cancel every listener and wait up to `grace` for them to finish.
    ///
    /// Returns `false` when some listener was still running after `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        let finished = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if finished {
            info!(subscriptions = self.active.len(), "Subscription listeners stopped");
        } else {
            warn!(
                running = self.tracker.len(),
                "Subscription listeners still running after shutdown grace period"
            );
        }
        finished
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a listener needs to keep one entry current.
pub(crate) struct SubscriptionTask {
    pub key: ServiceKey,
    pub client: Arc<dyn NamingClient>,
    pub entries: Arc<EntryMap>,
    pub healthy_only: bool,
    pub refresh: Duration,
    pub query_timeout: Duration,
}

impl SubscriptionTask {
    async fn run(self, cancel: CancellationToken) {
        let key = &self.key;
        info!(
            service = %key.service,
            group = %key.group,
            namespace = %key.namespace,
            "Subscribing to service"
        );

        let listener = Arc::new(CacheUpdater {
            key: key.clone(),
            entries: self.entries.clone(),
            healthy_only: self.healthy_only,
        });

        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.client.subscribe(&key.service, &key.group, listener) => result,
        };

        match subscribed {
            Ok(()) => {
                info!(key = %key, "Subscribed to service");
                cancel.cancelled().await;
                if let Err(e) = self.client.unsubscribe(&key.service, &key.group).await {
                    warn!(key = %key, error = %e, "Failed to unsubscribe from service");
                }
            }
            Err(ClientError::PushUnsupported) => {
                info!(
                    key = %key,
                    refresh_ms = self.refresh.as_millis() as u64,
                    "Registry client cannot push, polling instead"
                );
                self.poll(cancel).await;
            }
            Err(e) => {
                error!(
                    key = %key,
                    error = %e,
                    refresh_ms = self.refresh.as_millis() as u64,
                    "Subscribe to service failed, polling instead"
                );
                self.poll(cancel).await;
            }
        }
    }

    async fn poll(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.refresh.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the entry was just fetched.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match fetch(self.client.as_ref(), &self.key, self.healthy_only, self.query_timeout).await {
                        Ok(fetched) => {
                            if let Some(warning) = &fetched.warning {
                                warn!(key = %self.key, warning = %warning, "Polled instances filtered");
                            }
                            install(&self.entries, &self.key, fetched.instances);
                            debug!(key = %self.key, "Refreshed instance cache");
                        }
                        Err(e) => {
                            warn!(key = %self.key, error = %e, "Poll failed, keeping cached instances");
                        }
                    }
                }
            }
        }
    }
}

/// Writes pushed instance lists into the cache under the subscribed key.
struct CacheUpdater {
    key: ServiceKey,
    entries: Arc<EntryMap>,
    healthy_only: bool,
}

impl CacheUpdater {
    /// The registry may report `group@@service` instead of the bare name.
    fn reports_same_service(&self, reported: &str) -> bool {
        reported == self.key.service
            || reported
                .rsplit_once(SERVICE_KEY_SEPARATOR)
                .is_some_and(|(_, service)| service == self.key.service)
    }
}

impl EventListener for CacheUpdater {
    fn on_event(&self, event: std::result::Result<NamingEvent, ClientError>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                error!(key = %self.key, error = %e, "Subscription callback failed");
                return;
            }
        };

        if !self.reports_same_service(&event.service_name) {
            debug!(
                key = %self.key,
                reported = %event.service_name,
                "Registry reported a different service name, caching under subscribed key"
            );
        }

        if event.instances.is_empty() {
            warn!(key = %self.key, "Ignoring empty instance push, keeping cached instances");
            return;
        }

        let instances = filter_routable(event.instances, self.healthy_only);
        info!(key = %self.key, instances = instances.len(), "Update instance cache");
        install(&self.entries, &self.key, instances);
    }
}
