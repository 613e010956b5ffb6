//! Broker transport seam
//!
//! The relay needs a small slice of what an AMQP broker offers: durable
//! queues with TTL and dead-letter arguments, exclusive auto-named reply
//! queues, publishing with correlation properties, manual-ack consumption
//! and queue deletion. [`Broker`] captures exactly that slice so the
//! dispatcher and worker loop run unchanged against RabbitMQ
//! ([`crate::amqp`]) or the in-process broker ([`crate::memory`]).

use crate::queues::QueueDeclaration;
use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Message properties used for request/reply correlation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Links a reply to its request
    pub correlation_id: Option<String>,
    /// Queue the reply must be published to
    pub reply_to: Option<String>,
    /// Id of the relayed message
    pub message_id: Option<String>,
}

impl MessageProperties {
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// A message body with its properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

impl Envelope {
    pub fn new(body: Vec<u8>, properties: MessageProperties) -> Self {
        Self { body, properties }
    }
}

/// Settles a consumed message
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Remove the message from its queue
    async fn ack(&self) -> Result<()>;

    /// Reject the message without requeueing; the queue's dead-letter
    /// routing decides where it goes
    async fn nack(&self) -> Result<()>;
}

/// A consumed message awaiting settlement
pub struct Delivery {
    pub envelope: Envelope,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(envelope: Envelope, acker: Box<dyn Acknowledger>) -> Self {
        Self { envelope, acker }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self) -> Result<()> {
        self.acker.nack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .finish()
    }
}

/// How consumed messages are settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The broker settles on delivery; `ack`/`nack` are no-ops
    Auto,
    /// The consumer must `ack` or `nack` every delivery
    Manual,
}

/// Stream of deliveries from one queue; ends when the queue goes away
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// An open broker channel
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a durable queue; idempotent for identical arguments
    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<()>;

    /// Declare an exclusive, auto-named queue and return its name
    async fn declare_reply_queue(&self) -> Result<String>;

    /// Publish to a queue through the default exchange
    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<()>;

    /// Start consuming a queue
    async fn consume(&self, queue: &str, mode: AckMode) -> Result<DeliveryStream>;

    /// Delete a queue; deleting a missing queue succeeds
    async fn delete_queue(&self, queue: &str) -> Result<()>;

    /// Whether the channel is currently usable
    fn is_open(&self) -> bool;

    /// Close the channel and its connection
    async fn close(&self) -> Result<()>;
}

/// Opens broker channels
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Make a single connection attempt
    async fn connect(&self) -> Result<Arc<dyn Broker>>;

    /// Human-readable target, for logs
    fn describe(&self) -> String;
}
