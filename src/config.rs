//! Gateway and relay configuration
//!
//! [`GatewayConfig::from_env`] reads the process environment; every value
//! has a default suitable for local development. [`RelayConfig`] carries
//! the relay timing constants and is normally left at its defaults outside
//! of tests.

use crate::queues::DEFAULT_MESSAGE_TTL;
use crate::status::StatusRegistryConfig;
use crate::{Error, Result};
use std::time::Duration;

pub const DEFAULT_RABBITMQ_URL: &str = "amqp://rabbitmq:5672";
pub const DEFAULT_PROASIG_URL: &str = "http://localhost:8080/graphql";
pub const DEFAULT_CALIF_URL: &str = "http://localhost:8081/graphql";
pub const DEFAULT_AUTH_URL: &str = "http://localhost:8082/api/v1";
pub const DEFAULT_SIA_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_PORT: u16 = 4000;

/// Relay timing and sizing
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Connection attempts before giving up (default: 30)
    pub max_connect_attempts: u32,
    /// Fixed delay between connection attempts (default: 5 seconds)
    pub connect_retry_delay: Duration,
    /// Upstream attempts per message, including the first (default: 3)
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n × retry_backoff` (default: 1 second)
    pub retry_backoff: Duration,
    /// How long a caller waits for its reply (default: 30 seconds)
    pub reply_timeout: Duration,
    /// `x-message-ttl` of the declared queues (default: 24 hours)
    pub message_ttl: Duration,
    /// Bounds of the message status registry
    pub status: StatusRegistryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: 30,
            connect_retry_delay: Duration::from_secs(5),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            reply_timeout: Duration::from_secs(30),
            message_ttl: DEFAULT_MESSAGE_TTL,
            status: StatusRegistryConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts.max(1);
        self
    }

    pub fn connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay = delay;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = ttl;
        self
    }

    pub fn status(mut self, status: StatusRegistryConfig) -> Self {
        self.status = status;
        self
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff * attempt
    }
}

/// Which broker transport the gateway runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerKind {
    /// RabbitMQ over AMQP 0.9.1
    #[default]
    Amqp,
    /// In-process queues; no external broker
    Memory,
}

impl std::str::FromStr for BrokerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amqp" | "rabbitmq" => Ok(BrokerKind::Amqp),
            "memory" | "in-process" => Ok(BrokerKind::Memory),
            other => Err(Error::InvalidRequest(format!(
                "unknown RELAY_BROKER '{}', expected 'amqp' or 'memory'",
                other
            ))),
        }
    }
}

/// A backend service the gateway fronts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    pub name: &'static str,
    pub url: String,
}

/// Process-level configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP listen port (`PORT`)
    pub port: u16,
    /// Broker URL (`RABBITMQ_URL`)
    pub rabbitmq_url: String,
    /// Broker transport (`RELAY_BROKER`)
    pub broker: BrokerKind,
    /// Professor/subject GraphQL backend, the relay upstream (`GX_BE_PROASIG_URL`)
    pub proasig_url: String,
    /// Grades GraphQL backend (`GX_BE_CALIF_URL`)
    pub calif_url: String,
    /// Authentication API (`GX_AUTH_URL`)
    pub auth_url: String,
    /// Student information API (`GX_SIA_URL`)
    pub sia_url: String,
    /// Allowed CORS origin (`GX_FE_URL`); any origin when unset
    pub frontend_url: Option<String>,
    pub relay: RelayConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            rabbitmq_url: DEFAULT_RABBITMQ_URL.to_string(),
            broker: BrokerKind::default(),
            proasig_url: DEFAULT_PROASIG_URL.to_string(),
            calif_url: DEFAULT_CALIF_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            sia_url: DEFAULT_SIA_URL.to_string(),
            frontend_url: None,
            relay: RelayConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::InvalidRequest(format!("invalid PORT '{}'", raw)))?,
            None => defaults.port,
        };
        let broker = match get("RELAY_BROKER") {
            Some(raw) => raw.parse()?,
            None => defaults.broker,
        };

        Ok(Self {
            port,
            rabbitmq_url: get("RABBITMQ_URL").unwrap_or(defaults.rabbitmq_url),
            broker,
            proasig_url: get("GX_BE_PROASIG_URL").unwrap_or(defaults.proasig_url),
            calif_url: get("GX_BE_CALIF_URL").unwrap_or(defaults.calif_url),
            auth_url: get("GX_AUTH_URL").unwrap_or(defaults.auth_url),
            sia_url: get("GX_SIA_URL").unwrap_or(defaults.sia_url),
            frontend_url: get("GX_FE_URL"),
            relay: defaults.relay,
        })
    }

    /// Socket address to bind
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Configured backend services, in a stable order
    pub fn backends(&self) -> Vec<BackendEndpoint> {
        vec![
            BackendEndpoint {
                name: "beproasig",
                url: self.proasig_url.clone(),
            },
            BackendEndpoint {
                name: "becalif",
                url: self.calif_url.clone(),
            },
            BackendEndpoint {
                name: "auth",
                url: self.auth_url.clone(),
            },
            BackendEndpoint {
                name: "sia",
                url: self.sia_url.clone(),
            },
        ]
    }
}
