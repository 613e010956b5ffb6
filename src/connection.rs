//! Broker connection manager
//!
//! Owns the single broker connection of the relay. The first `connect()`
//! retries with a fixed delay, declares the queue topology and starts the
//! worker loop; later calls reuse the live connection. A connection that
//! went away is re-established on the next `connect()`.
//!
//! When every attempt fails the manager remembers it, so callers can fall
//! back to direct upstream calls without sitting through the retry loop
//! again. An explicit `connect()` clears that record and tries afresh.
//!
//! `shutdown()` is final: it interrupts a retry loop in progress and later
//! connects are refused.

use crate::broker::{Broker, BrokerConnector};
use crate::config::RelayConfig;
use crate::queues::QueueTopology;
use crate::status::StatusRegistry;
use crate::upstream::Upstream;
use crate::worker::{Worker, WorkerHandle};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

fn shutting_down() -> Error {
    Error::Connection("relay is shutting down".to_string())
}

/// Broker lifecycle owner shared by the dispatcher and the worker loop
///
/// `connect()` and `shutdown()` are serialized by an async mutex that is
/// held across the whole retry loop; `shutdown()` first raises the closing
/// flag so that loop gives up between attempts. The live broker and the
/// failure record are mirrored in sync locks, so status queries never wait
/// on a connection in progress.
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    upstream: Arc<dyn Upstream>,
    status: Arc<StatusRegistry>,
    config: RelayConfig,
    worker: Mutex<Option<WorkerHandle>>,
    live: RwLock<Option<Arc<dyn Broker>>>,
    failure: RwLock<Option<String>>,
    connecting: AtomicBool,
    reconnecting: AtomicBool,
    closing: watch::Sender<bool>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        upstream: Arc<dyn Upstream>,
        status: Arc<StatusRegistry>,
        config: RelayConfig,
    ) -> Self {
        Self {
            connector,
            upstream,
            status,
            config,
            worker: Mutex::new(None),
            live: RwLock::new(None),
            failure: RwLock::new(None),
            connecting: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            closing: watch::channel(false).0,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn status_registry(&self) -> &Arc<StatusRegistry> {
        &self.status
    }

    /// Return the live broker, connecting first if needed
    ///
    /// Concurrent callers are serialized; the second one receives the
    /// connection established by the first. Clears any recorded failure.
    pub async fn connect(&self) -> Result<Arc<dyn Broker>> {
        let mut worker = self.worker.lock().await;

        if let Some(broker) = self.broker() {
            return Ok(broker);
        }
        if let Some(stale) = worker.take() {
            warn!("Broker connection lost, reconnecting");
            stale.abort();
        }
        self.connecting.store(true, Ordering::SeqCst);
        *self.live.write() = None;
        *self.failure.write() = None;

        let result = self.establish().await;
        self.connecting.store(false, Ordering::SeqCst);

        match result {
            Ok((broker, handle)) => {
                *worker = Some(handle);
                *self.live.write() = Some(broker.clone());
                Ok(broker)
            }
            Err(e) => {
                *self.failure.write() = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(Arc<dyn Broker>, WorkerHandle)> {
        let max_attempts = self.config.max_connect_attempts.max(1);
        let target = self.connector.describe();
        let mut closing = self.closing.subscribe();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let closed = *closing.borrow();
            if closed {
                return Err(shutting_down());
            }

            info!(target = %target, attempt, max_attempts, "Connecting to broker");
            let connected = tokio::select! {
                connected = self.connector.connect() => connected,
                _ = closing.changed() => return Err(shutting_down()),
            };
            match connected {
                Ok(broker) => match self.initialize(broker.clone()).await {
                    Ok(worker) => return Ok((broker, worker)),
                    Err(e) => {
                        warn!(error = %e, "Broker setup failed");
                        if let Err(close_err) = broker.close().await {
                            warn!(error = %close_err, "Failed to close broker after setup error");
                        }
                        last_error = e.to_string();
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "Broker connection attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.connect_retry_delay) => {}
                    _ = closing.changed() => return Err(shutting_down()),
                }
            }
        }

        error!(target = %target, attempts = max_attempts, "Giving up on broker connection");
        Err(Error::Connection(format!(
            "broker unreachable after {} attempts: {}",
            max_attempts, last_error
        )))
    }

    /// Declare the topology, then start consuming it
    async fn initialize(&self, broker: Arc<dyn Broker>) -> Result<WorkerHandle> {
        for declaration in QueueTopology::new(self.config.message_ttl).declarations() {
            broker.declare_queue(&declaration).await?;
        }

        let worker = Worker::new(
            broker,
            self.upstream.clone(),
            self.status.clone(),
            self.config.clone(),
        );
        worker.spawn().await
    }

    /// The live broker, if connected and open
    pub fn broker(&self) -> Option<Arc<dyn Broker>> {
        self.live
            .read()
            .as_ref()
            .filter(|broker| broker.is_open())
            .cloned()
    }

    /// Whether a broker is held and open
    pub fn is_healthy(&self) -> bool {
        self.broker().is_some()
    }

    /// Whether a `connect()` is retrying or a reconnect is scheduled
    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst) || self.reconnecting.load(Ordering::SeqCst)
    }

    /// Whether a broker was held and has since closed
    pub fn is_lost(&self) -> bool {
        self.live
            .read()
            .as_ref()
            .is_some_and(|broker| !broker.is_open())
    }

    /// Run `connect()` on a background task unless one is already scheduled
    pub fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.connect().await {
                warn!(error = %e, "Background reconnect failed");
            }
            manager.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    /// Why the last connection attempt failed, if it did
    pub fn failure(&self) -> Option<String> {
        self.failure.read().clone()
    }

    /// Stop the worker loop and close the broker
    ///
    /// A `connect()` still retrying is abandoned at its next await point.
    pub async fn shutdown(&self) -> Result<()> {
        self.closing.send_replace(true);
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.take() {
            handle.abort();
        }

        let broker = self.live.write().take();
        if let Some(broker) = broker {
            broker.close().await?;
            info!("Relay connection shut down");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use crate::queues::QueueName;
    use crate::upstream::GraphQLRequest;
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl Upstream for Echo {
        async fn execute(&self, _request: &GraphQLRequest) -> Result<JsonValue> {
            Ok(json!({}))
        }
    }

    fn manager(connector: Arc<MemoryConnector>, attempts: u32) -> ConnectionManager {
        ConnectionManager::new(
            connector,
            Arc::new(Echo),
            Arc::new(StatusRegistry::default()),
            RelayConfig::new()
                .max_connect_attempts(attempts)
                .connect_retry_delay(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_connect_declares_topology() {
        let connector = Arc::new(MemoryConnector::new());
        let manager = manager(connector.clone(), 3);

        assert!(!manager.is_healthy());
        manager.connect().await.unwrap();
        assert!(manager.is_healthy());

        let broker = connector.broker();
        for queue in QueueName::ALL {
            assert!(broker.queue_exists(queue.as_str()));
        }
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let connector = Arc::new(MemoryConnector::new());
        let manager = manager(connector.clone(), 3);

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_connection() {
        let connector = Arc::new(MemoryConnector::new());
        let manager = Arc::new(manager(connector.clone(), 3));

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_broker_accepts() {
        let connector = Arc::new(MemoryConnector::failing(2));
        let manager = manager(connector.clone(), 5);

        manager.connect().await.unwrap();
        assert_eq!(connector.attempts(), 3);
        assert!(manager.failure().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_connection_error() {
        let connector = Arc::new(MemoryConnector::unreachable());
        let manager = manager(connector.clone(), 3);

        let err = manager.connect().await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(connector.attempts(), 3);
        assert!(manager.failure().is_some());
        assert!(!manager.is_healthy());
    }

    #[tokio::test]
    async fn test_explicit_connect_clears_failure() {
        let connector = Arc::new(MemoryConnector::failing(2));
        let manager = manager(connector.clone(), 2);

        assert!(manager.connect().await.is_err());
        assert!(manager.failure().is_some());

        manager.connect().await.unwrap();
        assert!(manager.failure().is_none());
        assert!(manager.is_healthy());
    }

    #[tokio::test]
    async fn test_reconnects_after_broker_closes() {
        let connector = Arc::new(MemoryConnector::new());
        let manager = manager(connector.clone(), 3);

        let broker = manager.connect().await.unwrap();
        broker.close().await.unwrap();
        assert!(!manager.is_healthy());

        manager.connect().await.unwrap();
        assert!(manager.is_healthy());
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_connect_retries() {
        let connector = Arc::new(MemoryConnector::unreachable());
        let manager = Arc::new(ConnectionManager::new(
            connector.clone(),
            Arc::new(Echo),
            Arc::new(StatusRegistry::default()),
            RelayConfig::new()
                .max_connect_attempts(30)
                .connect_retry_delay(Duration::from_millis(200)),
        ));

        let connecting = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect().await }
        });
        while !manager.is_connecting() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(1), manager.shutdown())
            .await
            .expect("shutdown waited on the retry loop")
            .unwrap();

        let err = connecting.await.unwrap().err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
        assert!(connector.attempts() < 30);
        assert!(!manager.is_connecting());

        // A shut down manager stays down
        assert!(manager.connect().await.is_err());
        assert!(!manager.is_healthy());
    }

    #[tokio::test]
    async fn test_background_reconnect_after_loss() {
        let connector = Arc::new(MemoryConnector::new());
        let manager = Arc::new(manager(connector.clone(), 3));

        let broker = manager.connect().await.unwrap();
        assert!(!manager.is_lost());
        broker.close().await.unwrap();
        assert!(manager.is_lost());

        manager.spawn_reconnect();
        manager.spawn_reconnect();
        assert!(manager.is_connecting());

        for _ in 0..200 {
            if manager.is_healthy() && !manager.is_connecting() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(manager.is_healthy());
        assert!(!manager.is_lost());
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_broker() {
        let connector = Arc::new(MemoryConnector::new());
        let manager = manager(connector, 3);

        let broker = manager.connect().await.unwrap();
        manager.shutdown().await.unwrap();

        assert!(!broker.is_open());
        assert!(!manager.is_healthy());
        // Shutting down twice is fine
        manager.shutdown().await.unwrap();
    }
}
