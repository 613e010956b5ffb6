//! Request/reply dispatcher
//!
//! Publishes an operation to its priority lane and waits for the worker's
//! correlated reply on a private, exclusive reply queue. The reply
//! listener is registered before the publish, so a fast worker cannot
//! answer before anyone is listening. The reply queue is deleted on every
//! exit path.

use crate::broker::{AckMode, Broker, DeliveryStream, Envelope, MessageProperties};
use crate::classifier::OperationKind;
use crate::connection::ConnectionManager;
use crate::message::{OutboundMessage, Reply};
use crate::metrics::{RelayMetrics, RoundTripTimer};
use crate::status::MessageStatus;
use crate::{Error, Result};
use futures::StreamExt;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Sends operations through the broker and awaits their replies
#[derive(Clone)]
pub struct Dispatcher {
    manager: Arc<ConnectionManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Relay an operation, inferring its priority from the body
    pub async fn send_query(
        &self,
        query: &str,
        variables: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        self.send(OperationKind::infer(query), query, variables)
            .await
    }

    /// Relay an operation on the lane for `kind` and return the upstream `data`
    #[instrument(skip(self, query, variables), fields(kind = ?kind))]
    pub async fn send(
        &self,
        kind: OperationKind,
        query: &str,
        variables: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        let broker = self.manager.broker().ok_or(Error::NotConnected)?;
        let lane = kind.queue();
        let message = OutboundMessage::new(query, variables);
        let correlation_id = uuid::Uuid::new_v4().to_string();

        let reply_queue = broker.declare_reply_queue().await?;
        let replies = match broker.consume(&reply_queue, AckMode::Auto).await {
            Ok(stream) => stream,
            Err(e) => {
                remove_reply_queue(broker.as_ref(), &reply_queue).await;
                return Err(e);
            }
        };

        let (tx, rx) = oneshot::channel();
        let listener = tokio::spawn(listen_for_reply(replies, correlation_id.clone(), tx));

        let properties = MessageProperties::default()
            .with_correlation_id(correlation_id.clone())
            .with_reply_to(reply_queue.clone())
            .with_message_id(message.id.clone());

        // Marked before publishing so a fast worker's update is not overwritten
        let status = self.manager.status_registry();
        status.set(&message.id, MessageStatus::Queued);

        let published = match message.to_bytes() {
            Ok(body) => broker.publish(lane.as_str(), Envelope::new(body, properties)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            status.set(&message.id, MessageStatus::Failed);
            finish(broker.as_ref(), &reply_queue, listener).await;
            return Err(e);
        }

        RelayMetrics::global().record_published(lane.as_str());
        debug!(message_id = %message.id, queue = %lane, "Message queued");

        let _timer = RoundTripTimer::start(lane.as_str());
        let timeout = self.manager.config().reply_timeout;
        let outcome = tokio::time::timeout(timeout, rx).await;
        finish(broker.as_ref(), &reply_queue, listener).await;

        match outcome {
            Ok(Ok(reply)) => {
                status.set(&message.id, MessageStatus::Responded);
                reply.into_result()
            }
            Ok(Err(_)) => {
                status.set(&message.id, MessageStatus::Failed);
                Err(Error::Broker(
                    "reply queue closed before a reply arrived".to_string(),
                ))
            }
            Err(_) => {
                warn!(message_id = %message.id, timeout = ?timeout, "No reply before timeout");
                RelayMetrics::global().record_timeout();
                Err(Error::Timeout(timeout))
            }
        }
    }
}

/// Forward the first reply carrying `correlation_id`
async fn listen_for_reply(
    mut replies: DeliveryStream,
    correlation_id: String,
    tx: oneshot::Sender<Reply>,
) {
    while let Some(delivery) = replies.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(error = %e, "Reply consumer error");
                continue;
            }
        };

        let properties = &delivery.envelope.properties;
        if properties.correlation_id.as_deref() != Some(correlation_id.as_str()) {
            debug!(
                correlation_id = ?properties.correlation_id,
                "Ignoring reply for another request"
            );
            continue;
        }

        match Reply::from_bytes(&delivery.envelope.body) {
            Ok(reply) => {
                // The caller may already have timed out
                let _ = tx.send(reply);
                return;
            }
            Err(e) => warn!(error = %e, "Skipping undecodable reply"),
        }
    }
}

async fn finish(broker: &dyn Broker, reply_queue: &str, listener: JoinHandle<()>) {
    listener.abort();
    remove_reply_queue(broker, reply_queue).await;
}

async fn remove_reply_queue(broker: &dyn Broker, reply_queue: &str) {
    if let Err(e) = broker.delete_queue(reply_queue).await {
        warn!(queue = %reply_queue, error = %e, "Failed to delete reply queue");
    }
}
