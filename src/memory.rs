//! In-process broker
//!
//! Queues are unbounded tokio channels living inside the process. The
//! broker keeps the semantics the relay depends on:
//!
//! - publishing to a queue that does not exist fails (a late reply to a
//!   deleted reply queue errors exactly like on RabbitMQ)
//! - `nack` routes the message to the queue's dead-letter target
//! - a queue has at most one consumer, and its stream ends when the queue
//!   is deleted or the broker closes
//!
//! Used by the test-suite and for running the gateway without RabbitMQ
//! (`RELAY_BROKER=memory`).

use crate::broker::{
    AckMode, Acknowledger, Broker, BrokerConnector, Delivery, DeliveryStream, Envelope,
};
use crate::queues::QueueDeclaration;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct QueueSlot {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Option<mpsc::UnboundedReceiver<Envelope>>,
    /// `None` for exclusive reply queues
    declaration: Option<QueueDeclaration>,
}

impl QueueSlot {
    fn new(declaration: Option<QueueDeclaration>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            declaration,
        }
    }

    fn dead_letter_target(&self) -> Option<String> {
        self.declaration
            .as_ref()
            .and_then(|d| d.dead_letter_routing_key.clone())
    }
}

#[derive(Default)]
struct Settlements {
    acked: usize,
    nacked: usize,
}

struct Inner {
    queues: Mutex<HashMap<String, QueueSlot>>,
    history: Mutex<HashMap<String, Vec<Envelope>>>,
    settlements: Mutex<HashMap<String, Settlements>>,
    open: AtomicBool,
}

impl Inner {
    fn publish(&self, queue: &str, envelope: Envelope) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::Broker("channel is closed".to_string()));
        }

        let queues = self.queues.lock();
        let slot = queues
            .get(queue)
            .ok_or_else(|| Error::Broker(format!("NOT_FOUND - no queue '{}'", queue)))?;

        self.history
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push(envelope.clone());

        slot.tx
            .send(envelope)
            .map_err(|_| Error::Broker(format!("queue '{}' is gone", queue)))
    }

    fn record(&self, queue: &str, acked: bool) {
        let mut settlements = self.settlements.lock();
        let entry = settlements.entry(queue.to_string()).or_default();
        if acked {
            entry.acked += 1;
        } else {
            entry.nacked += 1;
        }
    }
}

/// Broker whose queues live in this process
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                history: Mutex::new(HashMap::new()),
                settlements: Mutex::new(HashMap::new()),
                open: AtomicBool::new(true),
            }),
        }
    }

    /// Whether a queue currently exists
    pub fn queue_exists(&self, queue: &str) -> bool {
        self.inner.queues.lock().contains_key(queue)
    }

    /// Every envelope ever published to `queue`, oldest first
    pub fn published(&self, queue: &str) -> Vec<Envelope> {
        self.inner
            .history
            .lock()
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of deliveries from `queue` that were acked
    pub fn acked(&self, queue: &str) -> usize {
        self.inner
            .settlements
            .lock()
            .get(queue)
            .map(|s| s.acked)
            .unwrap_or(0)
    }

    /// Number of deliveries from `queue` that were nacked
    pub fn nacked(&self, queue: &str) -> usize {
        self.inner
            .settlements
            .lock()
            .get(queue)
            .map(|s| s.nacked)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<()> {
        let mut queues = self.inner.queues.lock();
        match queues.get(&declaration.name) {
            Some(slot) if slot.declaration.as_ref() == Some(declaration) => Ok(()),
            Some(_) => Err(Error::Broker(format!(
                "PRECONDITION_FAILED - inequivalent arguments for queue '{}'",
                declaration.name
            ))),
            None => {
                queues.insert(
                    declaration.name.clone(),
                    QueueSlot::new(Some(declaration.clone())),
                );
                debug!(queue = %declaration.name, "Declared in-process queue");
                Ok(())
            }
        }
    }

    async fn declare_reply_queue(&self) -> Result<String> {
        let name = format!("amq.gen-{}", uuid::Uuid::new_v4().simple());
        self.inner
            .queues
            .lock()
            .insert(name.clone(), QueueSlot::new(None));
        Ok(name)
    }

    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<()> {
        self.inner.publish(queue, envelope)
    }

    async fn consume(&self, queue: &str, mode: AckMode) -> Result<DeliveryStream> {
        let rx = {
            let mut queues = self.inner.queues.lock();
            let slot = queues
                .get_mut(queue)
                .ok_or_else(|| Error::Broker(format!("NOT_FOUND - no queue '{}'", queue)))?;
            slot.rx.take().ok_or_else(|| {
                Error::Broker(format!(
                    "RESOURCE_LOCKED - queue '{}' already has a consumer",
                    queue
                ))
            })?
        };

        let inner = self.inner.clone();
        let queue = queue.to_string();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|envelope| (envelope, rx))
        })
        .map(move |envelope| {
            let acker = MemoryAcker {
                inner: inner.clone(),
                queue: queue.clone(),
                envelope: envelope.clone(),
                mode,
                settled: AtomicBool::new(false),
            };
            Ok(Delivery::new(envelope, Box::new(acker)))
        });

        Ok(stream.boxed())
    }

    async fn delete_queue(&self, queue: &str) -> Result<()> {
        if self.inner.queues.lock().remove(queue).is_some() {
            debug!(queue = %queue, "Deleted in-process queue");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.inner.open.store(false, Ordering::SeqCst);
        self.inner.queues.lock().clear();
        Ok(())
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    queue: String,
    envelope: Envelope,
    mode: AckMode,
    settled: AtomicBool,
}

impl MemoryAcker {
    fn settle(&self) -> Result<bool> {
        if self.mode == AckMode::Auto {
            return Ok(false);
        }
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(Error::Broker(format!(
                "PRECONDITION_FAILED - delivery from '{}' already settled",
                self.queue
            )));
        }
        Ok(true)
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        if self.settle()? {
            self.inner.record(&self.queue, true);
        }
        Ok(())
    }

    async fn nack(&self) -> Result<()> {
        if !self.settle()? {
            return Ok(());
        }
        self.inner.record(&self.queue, false);

        let target = self
            .inner
            .queues
            .lock()
            .get(&self.queue)
            .and_then(QueueSlot::dead_letter_target);

        match target {
            Some(target) if target != self.queue => {
                if let Err(e) = self.inner.publish(&target, self.envelope.clone()) {
                    warn!(queue = %self.queue, target = %target, error = %e, "Dead-lettering failed");
                }
            }
            _ => debug!(queue = %self.queue, "Rejected message dropped"),
        }
        Ok(())
    }
}

/// Connector handing out a shared [`MemoryBroker`]
///
/// Can be told to refuse a number of connection attempts first, which is
/// how the retry path of the connection manager is exercised.
pub struct MemoryConnector {
    broker: Mutex<MemoryBroker>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::failing(0)
    }

    /// Refuse the first `failures` connection attempts
    pub fn failing(failures: u32) -> Self {
        Self {
            broker: Mutex::new(MemoryBroker::new()),
            failures_remaining: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Refuse every connection attempt
    pub fn unreachable() -> Self {
        Self::failing(u32::MAX)
    }

    /// Refuse the next `attempts` connection attempts
    pub fn refuse_next(&self, attempts: u32) {
        self.failures_remaining.store(attempts, Ordering::SeqCst);
    }

    /// Number of connection attempts seen so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The broker handed out by the next successful attempt
    pub fn broker(&self) -> MemoryBroker {
        self.broker.lock().clone()
    }
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Broker>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::Connection("connection refused".to_string()));
        }

        let mut broker = self.broker.lock();
        if !broker.is_open() {
            *broker = MemoryBroker::new();
        }
        Ok(Arc::new(broker.clone()))
    }

    fn describe(&self) -> String {
        "memory://local".to_string()
    }
}
