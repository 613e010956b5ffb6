//! # gx-graphql-gateway
//!
//! GraphQL gateway relay. Operations bound for the professor/subject
//! backend travel over a message broker instead of a direct HTTP call:
//!
//! - **Priority lanes**: reads, writes and everything else go to separate
//!   durable queues, each drained in order by its own worker task.
//! - **Correlated replies**: callers wait on a private reply queue for the
//!   reply carrying their correlation id, with a timeout.
//! - **Retry and dead-lettering**: the worker retries failed upstream
//!   calls with a linear backoff and archives what still fails in an
//!   error queue.
//! - **Fallback**: when the broker is unavailable, calls go straight to
//!   the upstream over HTTP.
//!
//! ## Main Components
//!
//! - [`RelayClient`]: caller-facing `send_async` / `send_direct`.
//! - [`ConnectionManager`]: broker lifecycle, topology and worker startup.
//! - [`Dispatcher`]: publish and await the correlated reply.
//! - [`Worker`]: lane consumers with retry and dead-lettering.
//! - [`Broker`]: transport seam, implemented by [`AmqpBroker`] (RabbitMQ)
//!   and [`MemoryBroker`] (in-process).
//!
//! ## Example
//!
//! ```rust,no_run
//! use gx_graphql_gateway::{AmqpConnector, HttpUpstream, RelayClient, RelayConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let upstream = Arc::new(HttpUpstream::new("http://localhost:8080/graphql")?);
//!     let connector = Arc::new(AmqpConnector::new("amqp://rabbitmq:5672"));
//!     let client = RelayClient::new(connector, upstream, RelayConfig::default());
//!
//!     let data = client
//!         .send_async("query { holaMundo }", Default::default())
//!         .await?;
//!     println!("{}", data);
//!     Ok(())
//! }
//! ```

pub mod amqp;
pub mod broker;
pub mod classifier;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod queues;
pub mod server;
pub mod status;
pub mod upstream;
pub mod worker;

pub use amqp::{AmqpBroker, AmqpConnector};
pub use broker::{
    AckMode, Acknowledger, Broker, BrokerConnector, Delivery, DeliveryStream, Envelope,
    MessageProperties,
};
pub use classifier::{classify, OperationKind};
pub use client::RelayClient;
pub use config::{BackendEndpoint, BrokerKind, GatewayConfig, RelayConfig};
pub use connection::ConnectionManager;
pub use dispatcher::Dispatcher;
pub use error::{Error, GraphQLError, Result};
pub use health::{ComponentHealth, HealthResponse, HealthStatus, RelayHealth};
pub use memory::{MemoryBroker, MemoryConnector};
pub use message::{DeadLetter, OutboundMessage, Reply};
pub use metrics::RelayMetrics;
pub use queues::{QueueDeclaration, QueueName, QueueTopology};
pub use server::router;
pub use status::{MessageStatus, StatusRegistry, StatusRegistryConfig};
pub use upstream::{GraphQLRequest, GraphQLResponse, HttpUpstream, Upstream};
pub use worker::{Worker, WorkerHandle};
