//! Health reporting
//!
//! # Endpoints
//!
//! - `/health` - Liveness: 200 while the process runs. The relay shows up
//!   as a component check and is `degraded` while calls go direct.
//! - `/health/relay` - Relay report `{status, queues, messageStatus}`:
//!   200 when a broker connection is open, 503 otherwise.

use crate::client::RelayClient;
use crate::connection::ConnectionManager;
use crate::queues::QueueTopology;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Overall health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Operational through the direct fallback
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn status_code(self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Snapshot of the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayHealth {
    /// `healthy` iff a broker connection is open
    pub status: HealthStatus,
    /// Logical queue labels
    pub queues: Vec<String>,
    /// Message id → last known status
    pub message_status: BTreeMap<String, String>,
}

impl RelayHealth {
    /// Inspect a connection manager
    pub fn collect(manager: &ConnectionManager) -> Self {
        let status = if manager.is_healthy() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            status,
            queues: QueueTopology::default().labels(),
            message_status: manager.status_registry().snapshot(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

impl IntoResponse for RelayHealth {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

/// One checked component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub checks: Vec<ComponentHealth>,
}

impl HealthResponse {
    pub fn healthy_with_message(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: Some(message.into()),
            checks: Vec::new(),
        }
    }

    /// Add a component check; the overall status only ever gets worse
    pub fn with_check(mut self, check: ComponentHealth) -> Self {
        self.status = match (self.status, check.status) {
            (_, HealthStatus::Unhealthy) | (HealthStatus::Unhealthy, _) => {
                HealthStatus::Unhealthy
            }
            (_, HealthStatus::Degraded) | (HealthStatus::Degraded, _) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };
        self.checks.push(check);
        self
    }
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

/// `/health`
pub async fn health_handler(State(client): State<Arc<RelayClient>>) -> HealthResponse {
    let relay = RelayHealth::collect(client.manager());
    let (status, message) = if relay.is_healthy() {
        (HealthStatus::Healthy, "broker connected".to_string())
    } else {
        let manager = client.manager();
        let reason = match manager.failure() {
            Some(reason) => reason,
            None if manager.is_connecting() => "connecting to broker".to_string(),
            None => "broker not connected".to_string(),
        };
        (HealthStatus::Degraded, format!("direct fallback: {}", reason))
    };

    HealthResponse::healthy_with_message("Gateway is running").with_check(ComponentHealth {
        name: "relay".to_string(),
        status,
        message: Some(message),
    })
}

/// `/health/relay`
pub async fn relay_health_handler(State(client): State<Arc<RelayClient>>) -> RelayHealth {
    client.health_status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MessageStatus;

    fn component(status: HealthStatus) -> ComponentHealth {
        ComponentHealth {
            name: "c".to_string(),
            status,
            message: None,
        }
    }

    #[test]
    fn test_status_only_gets_worse() {
        let response = HealthResponse::healthy_with_message("ok")
            .with_check(component(HealthStatus::Degraded))
            .with_check(component(HealthStatus::Healthy));
        assert_eq!(response.status, HealthStatus::Degraded);

        let response = response.with_check(component(HealthStatus::Unhealthy));
        assert_eq!(response.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_degraded_is_still_ok() {
        let response =
            HealthResponse::healthy_with_message("ok").with_check(component(HealthStatus::Degraded));
        assert_eq!(response.into_response().status(), StatusCode::OK);
    }

    #[test]
    fn test_relay_health_shape() {
        let mut message_status = BTreeMap::new();
        message_status.insert("m1".to_string(), MessageStatus::Completed.to_string());
        let health = RelayHealth {
            status: HealthStatus::Healthy,
            queues: QueueTopology::default().labels(),
            message_status,
        };

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(
            json["queues"],
            serde_json::json!(["HIGH_PRIORITY", "NORMAL_PRIORITY", "LOW_PRIORITY", "ERROR_QUEUE"])
        );
        assert_eq!(json["messageStatus"]["m1"], "completed");
    }

    #[test]
    fn test_unhealthy_relay_is_503() {
        let health = RelayHealth {
            status: HealthStatus::Unhealthy,
            queues: Vec::new(),
            message_status: BTreeMap::new(),
        };
        assert_eq!(
            health.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
