//! Message status registry
//!
//! Tracks the lifecycle of relayed messages for observability. Both the
//! dispatcher and the worker loop write to it; each message id is owned
//! by one call lifecycle, so the last writer wins.
//!
//! The registry is bounded: entries older than the TTL are pruned on
//! write and hidden on read, and once `max_entries` is reached the entry
//! inserted first is evicted.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Lifecycle states of a relayed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Published to a priority lane
    Queued,
    /// The caller received the correlated reply
    Responded,
    /// The worker processed it successfully
    Completed,
    /// The worker gave up and archived it in the error queue
    Error,
    /// Processing blew up outside the retry path; nacked
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Responded => "responded",
            MessageStatus::Completed => "completed",
            MessageStatus::Error => "error",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits for the status registry
#[derive(Debug, Clone)]
pub struct StatusRegistryConfig {
    /// Maximum number of tracked messages
    pub max_entries: usize,
    /// How long an entry is kept after its last update
    pub ttl: Duration,
}

impl Default for StatusRegistryConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    status: MessageStatus,
    updated_at: Instant,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Ids in order of first insertion; may hold ids already evicted
    order: VecDeque<String>,
}

/// Thread-safe, bounded map of message id to status
pub struct StatusRegistry {
    config: StatusRegistryConfig,
    state: RwLock<State>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new(StatusRegistryConfig::default())
    }
}

impl StatusRegistry {
    pub fn new(config: StatusRegistryConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State::default()),
        }
    }

    /// Record the status of a message
    pub fn set(&self, id: &str, status: MessageStatus) {
        let now = Instant::now();
        let mut state = self.state.write();

        self.prune_expired(&mut state, now);

        let entry = Entry {
            status,
            updated_at: now,
        };
        if state.entries.insert(id.to_string(), entry).is_none() {
            state.order.push_back(id.to_string());
        }

        while state.entries.len() > self.config.max_entries {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Current status of a message, if tracked and not expired
    pub fn get(&self, id: &str) -> Option<MessageStatus> {
        let state = self.state.read();
        state
            .entries
            .get(id)
            .filter(|e| e.updated_at.elapsed() <= self.config.ttl)
            .map(|e| e.status)
    }

    /// Number of tracked messages, including expired ones not yet pruned
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries as id → status name
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let state = self.state.read();
        state
            .entries
            .iter()
            .filter(|(_, e)| e.updated_at.elapsed() <= self.config.ttl)
            .map(|(id, e)| (id.clone(), e.status.as_str().to_string()))
            .collect()
    }

    fn prune_expired(&self, state: &mut State, now: Instant) {
        let ttl = self.config.ttl;
        state
            .entries
            .retain(|_, e| now.duration_since(e.updated_at) <= ttl);

        // Drop order slots whose entry is gone so the queue stays bounded
        let State { entries, order } = state;
        order.retain(|id| entries.contains_key(id));
    }
}
