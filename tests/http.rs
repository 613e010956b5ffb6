//! HTTP surface tests

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use gx_graphql_gateway::{
    router, Error, GraphQLRequest, MemoryConnector, RelayClient, RelayConfig, Result, Upstream,
};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Greeter;

#[async_trait]
impl Upstream for Greeter {
    async fn execute(&self, request: &GraphQLRequest) -> Result<JsonValue> {
        if request.query.contains("fallar") {
            return Err(Error::Upstream("GraphQL Error: no permitido".to_string()));
        }
        Ok(json!({"holaMundo": "Hola Mundo"}))
    }
}

fn client(connector: MemoryConnector) -> Arc<RelayClient> {
    Arc::new(RelayClient::new(
        Arc::new(connector),
        Arc::new(Greeter),
        RelayConfig::new()
            .max_connect_attempts(1)
            .retry_backoff(Duration::from_millis(1))
            .reply_timeout(Duration::from_secs(2)),
    ))
}

async fn body_json(response: axum::response::Response) -> JsonValue {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn graphql(body: JsonValue) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/graphql")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_graphql_relays_and_returns_data() {
    let app = router(client(MemoryConnector::new()), None);

    let response = app
        .oneshot(graphql(json!({"query": "query { holaMundo }"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"data": {"holaMundo": "Hola Mundo"}})
    );
}

#[tokio::test]
async fn test_graphql_reports_upstream_errors() {
    let app = router(client(MemoryConnector::new()), None);

    let response = app
        .oneshot(graphql(json!({"query": "mutation { fallar }"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["extensions"]["code"], "UPSTREAM_ERROR");
}

#[tokio::test]
async fn test_graphql_rejects_empty_query() {
    let app = router(client(MemoryConnector::new()), None);

    let response = app
        .oneshot(graphql(json!({"query": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_relay_health_reflects_connection() {
    let client = client(MemoryConnector::new());

    let response = router(client.clone(), None)
        .oneshot(
            Request::get("/health/relay")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unhealthy");

    client.connect().await.unwrap();

    let response = router(client, None)
        .oneshot(
            Request::get("/health/relay")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queues"][3], "ERROR_QUEUE");
    assert!(body["messageStatus"].is_object());
}

#[tokio::test]
async fn test_liveness_is_degraded_without_broker() {
    let client = client(MemoryConnector::unreachable());
    assert!(client.connect().await.is_err());

    let response = router(client, None)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"][0]["name"], "relay");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = router(client(MemoryConnector::new()), None);

    let response = app
        .clone()
        .oneshot(graphql(json!({"query": "query { holaMundo }"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("relay_messages_published_total"));
}

#[tokio::test]
async fn test_cors_allows_configured_origin() {
    let app = router(client(MemoryConnector::new()), Some("http://localhost:3000"));

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/graphql")
                .header(header::ORIGIN, "http://localhost:3000")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://localhost:3000"
    );
}
