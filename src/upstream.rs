//! Upstream GraphQL client
//!
//! Posts `{ "query": ..., "variables": {...} }` to a backend GraphQL
//! endpoint and unwraps the `data` field of the response. A response with
//! a non-empty `errors` field is a failure even when `data` is present.
//!
//! ```rust,ignore
//! use gx_graphql_gateway::{GraphQLRequest, HttpUpstream, Upstream};
//!
//! let upstream = HttpUpstream::builder()
//!     .url("http://localhost:8080/graphql")
//!     .timeout(std::time::Duration::from_secs(10))
//!     .build()?;
//!
//! let data = upstream.execute(&GraphQLRequest::new("query { holaMundo }")).await?;
//! ```

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// A GraphQL operation with its variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Map<String, JsonValue>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Map::new(),
        }
    }

    pub fn with_variables(mut self, variables: Map<String, JsonValue>) -> Self {
        self.variables = variables;
        self
    }
}

/// Response envelope returned by GraphQL servers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub errors: Option<JsonValue>,
}

impl GraphQLResponse {
    /// The `data` field, or an upstream error if `errors` is non-empty
    pub fn into_data(self) -> Result<JsonValue> {
        match self.errors {
            Some(JsonValue::Null) | None => Ok(self.data.unwrap_or(JsonValue::Null)),
            Some(JsonValue::Array(errors)) if errors.is_empty() => {
                Ok(self.data.unwrap_or(JsonValue::Null))
            }
            Some(errors) => Err(Error::Upstream(format!("GraphQL Error: {}", errors))),
        }
    }
}

/// A backend that executes GraphQL operations
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Execute the operation and return its `data`
    async fn execute(&self, request: &GraphQLRequest) -> Result<JsonValue>;
}

/// Configuration for [`HttpUpstream`]
#[derive(Debug, Clone)]
pub struct HttpUpstreamConfig {
    /// GraphQL endpoint URL
    pub url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for HttpUpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// GraphQL-over-HTTP upstream
#[derive(Clone)]
pub struct HttpUpstream {
    config: HttpUpstreamConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstream")
            .field("config", &self.config)
            .finish()
    }
}

impl HttpUpstream {
    pub fn builder() -> HttpUpstreamBuilder {
        HttpUpstreamBuilder::default()
    }

    /// Upstream with default settings
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::builder().url(url).build()
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    #[instrument(skip(self, request), fields(url = %self.config.url))]
    async fn execute(&self, request: &GraphQLRequest) -> Result<JsonValue> {
        let start = Instant::now();

        let response = self
            .client
            .post(&self.config.url)
            .timeout(self.config.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Upstream request failed");
                Error::Transport(e)
            })?;
        let status = response.status();
        let body = response.text().await?;

        debug!(status = status.as_u16(), duration = ?start.elapsed(), "Upstream responded");

        let parsed: GraphQLResponse = serde_json::from_str(&body).map_err(|_| {
            Error::Upstream(format!(
                "upstream returned {} with a non-GraphQL body",
                status.as_u16()
            ))
        })?;
        parsed.into_data()
    }
}

/// Builder for [`HttpUpstream`]
#[derive(Default)]
pub struct HttpUpstreamBuilder {
    config: HttpUpstreamConfig,
}

impl HttpUpstreamBuilder {
    /// GraphQL endpoint URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpUpstream> {
        if self.config.url.is_empty() {
            return Err(Error::InvalidRequest(
                "upstream URL is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(16)
            .build()?;
        Ok(HttpUpstream {
            config: self.config,
            client,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_response_with_errors_fails() {
        let response = GraphQLResponse {
            data: Some(json!({"profesores": null})),
            errors: Some(json!([{"message": "boom"}])),
        };
        let err = response.into_data().unwrap_err();
        assert!(matches!(err, Error::Upstream(msg) if msg.contains("boom")));
    }

    #[test]
    fn test_empty_errors_is_success() {
        let response = GraphQLResponse {
            data: Some(json!({"holaMundo": "hola"})),
            errors: Some(json!([])),
        };
        assert_eq!(response.into_data().unwrap(), json!({"holaMundo": "hola"}));
    }

    #[test]
    fn test_missing_data_is_null() {
        assert_eq!(
            GraphQLResponse::default().into_data().unwrap(),
            JsonValue::Null
        );
    }

    #[test]
    fn test_builder_requires_url() {
        assert!(HttpUpstream::builder().build().is_err());
    }

    #[tokio::test]
    async fn test_posts_query_and_variables() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "query": "query ($id: ID!) { profesorPorId(id: $id) { id } }",
                "variables": {"id": "7"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"profesorPorId": {"id": "7"}}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let upstream = HttpUpstream::new(format!("{}/graphql", server.uri())).unwrap();
        let mut variables = Map::new();
        variables.insert("id".to_string(), json!("7"));
        let request =
            GraphQLRequest::new("query ($id: ID!) { profesorPorId(id: $id) { id } }")
                .with_variables(variables);

        let data = upstream.execute(&request).await.unwrap();
        assert_eq!(data, json!({"profesorPorId": {"id": "7"}}));
    }

    #[tokio::test]
    async fn test_graphql_errors_map_to_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "documento duplicado"}]
            })))
            .mount(&server)
            .await;

        let upstream = HttpUpstream::new(server.uri()).unwrap();
        let err = upstream
            .execute(&GraphQLRequest::new("mutation { crearProfesor }"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(msg) if msg.contains("documento duplicado")));
    }

    #[tokio::test]
    async fn test_non_json_body_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let upstream = HttpUpstream::new(server.uri()).unwrap();
        let err = upstream
            .execute(&GraphQLRequest::new("{ holaMundo }"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(msg) if msg.contains("502")));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let upstream = HttpUpstream::builder()
            .url("http://127.0.0.1:1/graphql")
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let err = upstream
            .execute(&GraphQLRequest::new("{ holaMundo }"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
