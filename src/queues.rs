//! Queue topology for the relay
//!
//! Three priority lanes plus an error (dead-letter) queue. Every queue is
//! durable, expires messages after a day and dead-letters rejected messages
//! into the error queue through the default exchange.
//!
//! ```text
//!  proasig_high_priority ─┐
//!  proasig_normal_priority┼── nack / expiry ──► proasig_error
//!  proasig_low_priority  ─┘
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time-to-live for queued relay messages (24 hours)
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The four fixed relay queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    /// Read-only operations
    HighPriority,
    /// Create/update operations
    NormalPriority,
    /// Deletions and anything unrecognized
    LowPriority,
    /// Sink for messages whose processing failed
    Error,
}

impl QueueName {
    /// All queues, declaration order
    pub const ALL: [QueueName; 4] = [
        QueueName::HighPriority,
        QueueName::NormalPriority,
        QueueName::LowPriority,
        QueueName::Error,
    ];

    /// Queues drained by the worker loop
    pub const LANES: [QueueName; 3] = [
        QueueName::HighPriority,
        QueueName::NormalPriority,
        QueueName::LowPriority,
    ];

    /// Physical queue name on the broker
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::HighPriority => "proasig_high_priority",
            QueueName::NormalPriority => "proasig_normal_priority",
            QueueName::LowPriority => "proasig_low_priority",
            QueueName::Error => "proasig_error",
        }
    }

    /// Label reported by the health endpoint
    pub fn label(&self) -> &'static str {
        match self {
            QueueName::HighPriority => "HIGH_PRIORITY",
            QueueName::NormalPriority => "NORMAL_PRIORITY",
            QueueName::LowPriority => "LOW_PRIORITY",
            QueueName::Error => "ERROR_QUEUE",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration parameters for a durable queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    /// Physical queue name
    pub name: String,
    /// Survives broker restarts
    pub durable: bool,
    /// `x-message-ttl`
    pub message_ttl: Option<Duration>,
    /// `x-dead-letter-exchange`; empty string is the default exchange
    pub dead_letter_exchange: Option<String>,
    /// `x-dead-letter-routing-key`
    pub dead_letter_routing_key: Option<String>,
}

impl QueueDeclaration {
    /// Plain durable queue without arguments
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            message_ttl: None,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
        }
    }

    /// Set the message TTL
    pub fn with_message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = Some(ttl);
        self
    }

    /// Dead-letter rejected messages to `routing_key` via the default exchange
    pub fn with_dead_letter(mut self, routing_key: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(String::new());
        self.dead_letter_routing_key = Some(routing_key.into());
        self
    }
}

/// The full set of relay queues with their shared arguments
#[derive(Debug, Clone)]
pub struct QueueTopology {
    message_ttl: Duration,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            message_ttl: DEFAULT_MESSAGE_TTL,
        }
    }
}

impl QueueTopology {
    /// Topology with a custom message TTL
    pub fn new(message_ttl: Duration) -> Self {
        Self { message_ttl }
    }

    /// Declarations for all four queues
    ///
    /// The error queue carries the same arguments as the lanes. Brokers
    /// reject a redeclaration whose arguments differ, so these must stay
    /// stable across releases.
    pub fn declarations(&self) -> Vec<QueueDeclaration> {
        QueueName::ALL
            .iter()
            .map(|queue| {
                QueueDeclaration::durable(queue.as_str())
                    .with_message_ttl(self.message_ttl)
                    .with_dead_letter(QueueName::Error.as_str())
            })
            .collect()
    }

    /// Labels of every queue, for health reporting
    pub fn labels(&self) -> Vec<String> {
        QueueName::ALL.iter().map(|q| q.label().to_string()).collect()
    }
}
