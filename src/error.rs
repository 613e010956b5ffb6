//! Error types for the GraphQL relay gateway

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway
///
/// Covers broker connectivity, request correlation, upstream GraphQL
/// failures and the ambient serialization/IO errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Broker unreachable after exhausting connection retries
    #[error("Connection error: {0}")]
    Connection(String),

    /// Dispatch attempted without a live broker channel
    #[error("Relay is not connected to the broker")]
    NotConnected,

    /// No correlated reply arrived in time
    #[error("Timeout: no reply from the upstream service after {0:?}")]
    Timeout(std::time::Duration),

    /// The upstream answered with GraphQL-level errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A relay message could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Broker transport errors
    #[error("Broker error: {0}")]
    Broker(String),

    /// HTTP transport errors
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<lapin::Error> for Error {
    fn from(err: lapin::Error) -> Self {
        Error::Broker(err.to_string())
    }
}

impl Error {
    /// Whether the relay should fall back to a direct upstream call.
    ///
    /// Only broker availability problems qualify; a timeout or upstream
    /// failure may mean the operation already ran.
    pub fn is_broker_unavailable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::NotConnected)
    }

    /// Convert error to GraphQL error format
    ///
    /// # Security
    ///
    /// In production (ENV=production), internal error details are sanitized
    /// to prevent information disclosure.
    pub fn to_graphql_error(&self) -> GraphQLError {
        let is_production = std::env::var("ENV")
            .map(|e| e == "production" || e == "prod")
            .unwrap_or(false);

        let message = if is_production {
            match self {
                Error::Connection(_) | Error::NotConnected | Error::Broker(_) => {
                    "Service connection error".to_string()
                }
                Error::Transport(_) => "Backend service error".to_string(),
                Error::Internal(_) | Error::Io(_) => "Internal server error".to_string(),
                Error::Serialization(_) | Error::MalformedMessage(_) => {
                    "Data processing error".to_string()
                }
                Error::Other(_) => "An unexpected error occurred".to_string(),
                // Safe to expose
                Error::Timeout(_) => self.to_string(),
                Error::Upstream(msg) => msg.clone(),
                Error::InvalidRequest(msg) => format!("Invalid request: {}", msg),
            }
        } else {
            self.to_string()
        };

        GraphQLError {
            message,
            extensions: self.extensions(),
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::Connection(_) => "CONNECTION_ERROR",
            Error::NotConnected => "NOT_CONNECTED",
            Error::Timeout(_) => "TIMEOUT",
            Error::Upstream(_) => "UPSTREAM_ERROR",
            Error::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Error::Broker(_) => "BROKER_ERROR",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "UNKNOWN_ERROR",
        }
    }

    fn extensions(&self) -> std::collections::HashMap<String, serde_json::Value> {
        let mut map = std::collections::HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map
    }
}

/// GraphQL error response format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty", default)]
    pub extensions: std::collections::HashMap<String, serde_json::Value>,
}

impl From<Error> for GraphQLError {
    fn from(err: Error) -> Self {
        err.to_graphql_error()
    }
}
