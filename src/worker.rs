//! Worker loop
//!
//! Drains the three priority lanes. Each lane has its own task that
//! handles one message at a time, so processing is FIFO within a lane and
//! lanes never block each other. A fourth task drains the error queue.
//!
//! For every message the worker calls the upstream, retrying with a
//! linear backoff, then either replies to the caller or archives the
//! message in the error queue. Every delivery ends in an ack, a nack, or a
//! dead-letter publish followed by an ack. Settlement and reply are not
//! atomic; delivery to the caller is at-most-once.

use crate::broker::{AckMode, Broker, Delivery, DeliveryStream, Envelope, MessageProperties};
use crate::config::RelayConfig;
use crate::message::{DeadLetter, OutboundMessage, Reply};
use crate::metrics::{outcome, RelayMetrics};
use crate::queues::QueueName;
use crate::status::{MessageStatus, StatusRegistry};
use crate::upstream::{GraphQLRequest, Upstream};
use crate::{Error, Result};
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Consumes the priority lanes and executes their messages
#[derive(Clone)]
pub struct Worker {
    broker: Arc<dyn Broker>,
    upstream: Arc<dyn Upstream>,
    status: Arc<StatusRegistry>,
    config: RelayConfig,
}

/// Running worker tasks; dropping the handle leaves them running
pub struct WorkerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop every lane task
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Worker {
    pub fn new(
        broker: Arc<dyn Broker>,
        upstream: Arc<dyn Upstream>,
        status: Arc<StatusRegistry>,
        config: RelayConfig,
    ) -> Self {
        Self {
            broker,
            upstream,
            status,
            config,
        }
    }

    /// Start consuming every lane and the error queue
    ///
    /// The queues must already be declared.
    pub async fn spawn(self) -> Result<WorkerHandle> {
        let mut tasks = Vec::with_capacity(QueueName::ALL.len());

        for lane in QueueName::LANES {
            let stream = self.broker.consume(lane.as_str(), AckMode::Manual).await?;
            let worker = self.clone();
            tasks.push(tokio::spawn(async move {
                worker.run_lane(lane, stream).await;
            }));
        }

        let sink = self
            .broker
            .consume(QueueName::Error.as_str(), AckMode::Manual)
            .await?;
        tasks.push(tokio::spawn(drain_error_queue(sink)));

        info!(lanes = QueueName::LANES.len(), "Worker loop started");
        Ok(WorkerHandle { tasks })
    }

    async fn run_lane(self, lane: QueueName, mut stream: DeliveryStream) {
        debug!(queue = %lane, "Consuming lane");
        while let Some(delivery) = stream.next().await {
            match delivery {
                Ok(delivery) => self.handle(lane, delivery).await,
                Err(e) => warn!(queue = %lane, error = %e, "Consumer error"),
            }
        }
        info!(queue = %lane, "Lane consumer stopped");
    }

    #[instrument(skip(self, delivery), fields(queue = %lane))]
    async fn handle(&self, lane: QueueName, delivery: Delivery) {
        let message = match OutboundMessage::from_bytes(&delivery.envelope.body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Rejecting undecodable message");
                if let Some(id) = &delivery.envelope.properties.message_id {
                    self.status.set(id, MessageStatus::Failed);
                }
                settle(&delivery, false).await;
                RelayMetrics::global().record_processed(lane.as_str(), outcome::MALFORMED);
                return;
            }
        };

        let properties = &delivery.envelope.properties;
        match self.execute_with_retry(lane, &message).await {
            Ok(data) => {
                self.reply(properties, Reply::Data(data)).await;
                settle(&delivery, true).await;
                self.status.set(&message.id, MessageStatus::Completed);
                RelayMetrics::global().record_processed(lane.as_str(), outcome::COMPLETED);
                debug!(message_id = %message.id, "Message completed");
            }
            Err(e) => {
                let reason = failure_reason(&e);
                error!(message_id = %message.id, error = %reason, "Giving up on message");

                let archived = self.dead_letter(lane, message.clone(), &reason).await;
                self.reply(properties, Reply::Error(reason)).await;

                if archived {
                    settle(&delivery, true).await;
                } else {
                    // Let the broker's dead-letter routing take it instead
                    settle(&delivery, false).await;
                }
                self.status.set(&message.id, MessageStatus::Error);
                RelayMetrics::global().record_processed(lane.as_str(), outcome::DEAD_LETTERED);
            }
        }
    }

    async fn execute_with_retry(
        &self,
        lane: QueueName,
        message: &OutboundMessage,
    ) -> Result<JsonValue> {
        let request =
            GraphQLRequest::new(message.query.clone()).with_variables(message.variables.clone());
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.upstream.execute(&request).await {
                Ok(data) => return Ok(data),
                Err(e) if attempt < max_attempts => {
                    let delay = self.config.backoff_for(attempt);
                    warn!(
                        message_id = %message.id,
                        attempt,
                        max_attempts,
                        delay = ?delay,
                        error = %e,
                        "Upstream call failed, retrying"
                    );
                    RelayMetrics::global().record_retry(lane.as_str());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Publish the reply to the caller, if it asked for one
    async fn reply(&self, properties: &MessageProperties, reply: Reply) {
        let Some(reply_to) = &properties.reply_to else {
            return;
        };

        let body = match reply.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to encode reply");
                return;
            }
        };

        let reply_properties = MessageProperties {
            correlation_id: properties.correlation_id.clone(),
            ..MessageProperties::default()
        };

        if let Err(e) = self
            .broker
            .publish(reply_to, Envelope::new(body, reply_properties))
            .await
        {
            // The caller most likely timed out and deleted its reply queue
            warn!(reply_to = %reply_to, error = %e, "Reply could not be delivered");
        }
    }

    /// Archive a message in the error queue; returns whether it was published
    async fn dead_letter(&self, lane: QueueName, message: OutboundMessage, reason: &str) -> bool {
        let letter = DeadLetter {
            message,
            error: reason.to_string(),
            original_queue: lane.as_str().to_string(),
        };

        let result = match letter.to_bytes() {
            Ok(body) => {
                let properties =
                    MessageProperties::default().with_message_id(letter.message.id.clone());
                self.broker
                    .publish(QueueName::Error.as_str(), Envelope::new(body, properties))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(message_id = %letter.message.id, error = %e, "Failed to publish dead letter");
                false
            }
        }
    }
}

async fn settle(delivery: &Delivery, ack: bool) {
    let result = if ack {
        delivery.ack().await
    } else {
        delivery.nack().await
    };
    if let Err(e) = result {
        warn!(ack, error = %e, "Failed to settle delivery");
    }
}

/// Log and acknowledge everything that lands in the error queue
async fn drain_error_queue(mut stream: DeliveryStream) {
    while let Some(delivery) = stream.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(error = %e, "Error queue consumer error");
                continue;
            }
        };

        match DeadLetter::from_bytes(&delivery.envelope.body) {
            Ok(letter) => error!(
                message_id = %letter.message.id,
                original_queue = %letter.original_queue,
                error = %letter.error,
                "Dead letter received"
            ),
            Err(_) => error!(
                body = %String::from_utf8_lossy(&delivery.envelope.body),
                "Rejected message received"
            ),
        }
        settle(&delivery, true).await;
    }
    info!("Error queue consumer stopped");
}

/// Error text carried by dead letters and error replies
fn failure_reason(error: &Error) -> String {
    match error {
        Error::Upstream(message) => message.clone(),
        other => other.to_string(),
    }
}
