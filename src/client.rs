//! Caller-facing relay client
//!
//! [`RelayClient::send_async`] relays through the broker when it can and
//! calls the upstream directly when it cannot: the broker never came up,
//! it is unreachable now, or it went away during the session. A lost
//! connection is re-established on a background task while calls go
//! direct, so no caller waits on the retry loop after a drop. A timeout or
//! an upstream error is returned as is, since the operation may already
//! have run.
//!
//! ```rust,ignore
//! use gx_graphql_gateway::{HttpUpstream, MemoryConnector, RelayClient, RelayConfig};
//! use std::sync::Arc;
//!
//! let upstream = Arc::new(HttpUpstream::new("http://localhost:8080/graphql")?);
//! let client = RelayClient::new(Arc::new(MemoryConnector::new()), upstream, RelayConfig::default());
//!
//! let data = client.send_async("query { holaMundo }", Default::default()).await?;
//! ```

use crate::broker::BrokerConnector;
use crate::classifier::OperationKind;
use crate::config::RelayConfig;
use crate::connection::ConnectionManager;
use crate::dispatcher::Dispatcher;
use crate::health::RelayHealth;
use crate::metrics::RelayMetrics;
use crate::status::StatusRegistry;
use crate::upstream::{GraphQLRequest, Upstream};
use crate::{Error, Result};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Relays GraphQL operations, falling back to direct HTTP
pub struct RelayClient {
    manager: Arc<ConnectionManager>,
    dispatcher: Dispatcher,
    upstream: Arc<dyn Upstream>,
}

impl RelayClient {
    /// Client whose worker loop and direct fallback share `upstream`
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        upstream: Arc<dyn Upstream>,
        config: RelayConfig,
    ) -> Self {
        let status = Arc::new(StatusRegistry::new(config.status.clone()));
        let manager = Arc::new(ConnectionManager::new(
            connector,
            upstream.clone(),
            status,
            config,
        ));
        Self::with_manager(manager, upstream)
    }

    /// Client over an existing connection manager
    pub fn with_manager(manager: Arc<ConnectionManager>, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            dispatcher: Dispatcher::new(manager.clone()),
            manager,
            upstream,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Connect the relay now instead of on first use
    pub async fn connect(&self) -> Result<()> {
        self.manager.connect().await.map(|_| ())
    }

    /// Relay an operation, inferring its priority from the body
    pub async fn send_async(
        &self,
        query: &str,
        variables: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        self.send_async_as(OperationKind::infer(query), query, variables)
            .await
    }

    /// Relay an operation on the lane for `kind`
    pub async fn send_async_as(
        &self,
        kind: OperationKind,
        query: &str,
        variables: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        if let Some(reason) = self.manager.failure() {
            debug!(reason = %reason, "Relay unavailable, calling upstream directly");
            return self.fallback("init_failed", query, variables).await;
        }
        if self.manager.is_connecting() {
            debug!("Relay still connecting, calling upstream directly");
            return self.fallback("connecting", query, variables).await;
        }
        if self.manager.is_lost() {
            warn!("Broker connection lost, reconnecting in the background");
            self.manager.spawn_reconnect();
            return self.fallback("disconnected", query, variables).await;
        }

        if let Err(e) = self.manager.connect().await {
            if !e.is_broker_unavailable() {
                return Err(e);
            }
            warn!(error = %e, "Broker unreachable, calling upstream directly");
            return self.fallback("connection", query, variables).await;
        }

        match self.dispatcher.send(kind, query, variables.clone()).await {
            Err(Error::NotConnected) => {
                warn!("Broker went away, calling upstream directly");
                self.manager.spawn_reconnect();
                self.fallback("disconnected", query, variables).await
            }
            other => other,
        }
    }

    /// Call the upstream over HTTP without touching the broker
    pub async fn send_direct(
        &self,
        query: &str,
        variables: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        let request = GraphQLRequest::new(query).with_variables(variables);
        self.upstream.execute(&request).await
    }

    async fn fallback(
        &self,
        reason: &'static str,
        query: &str,
        variables: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        RelayMetrics::global().record_fallback(reason);
        self.send_direct(query, variables).await
    }

    /// Relay health report
    pub fn health_status(&self) -> RelayHealth {
        RelayHealth::collect(&self.manager)
    }

    /// Stop the worker loop and close the broker connection
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down relay");
        self.manager.shutdown().await
    }
}
