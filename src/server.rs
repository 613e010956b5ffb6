//! HTTP surface
//!
//! - `POST /graphql` relays `{query, variables?, operationName?}` and
//!   answers `{data}` or `{errors: [...]}`. An `x-relay-priority` header
//!   (`query`, `mutation` or `deletion`) picks the lane explicitly;
//!   otherwise it is inferred from the body.
//! - `GET /health`, `GET /health/relay`, `GET /metrics`.

use crate::classifier::OperationKind;
use crate::client::RelayClient;
use crate::error::{Error, GraphQLError};
use crate::health::{health_handler, relay_health_handler};
use crate::metrics::RelayMetrics;
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

/// Header naming the lane of a request
pub const PRIORITY_HEADER: &str = "x-relay-priority";

#[derive(Debug, Deserialize)]
struct GraphQlQuery {
    query: String,
    #[serde(default)]
    variables: Option<JsonValue>,
    #[serde(default)]
    #[serde(rename = "operationName")]
    operation_name: Option<String>,
}

/// Build the gateway router
///
/// `allowed_origin` restricts CORS to one origin; `None` allows any.
pub fn router(client: Arc<RelayClient>, allowed_origin: Option<&str>) -> Router {
    Router::new()
        .route("/graphql", post(graphql_handler))
        .route("/health", get(health_handler))
        .route("/health/relay", get(relay_health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors_layer(allowed_origin))
        .with_state(client)
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => layer.allow_origin(origin),
        Some(Err(_)) => {
            warn!("GX_FE_URL is not a valid origin, allowing any origin");
            layer.allow_origin(Any)
        }
        None => layer.allow_origin(Any),
    }
}

fn requested_kind(headers: &HeaderMap) -> Result<Option<OperationKind>, Error> {
    let Some(value) = headers.get(PRIORITY_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| Error::InvalidRequest(format!("{} is not valid text", PRIORITY_HEADER)))?;
    match value.trim().to_ascii_lowercase().as_str() {
        "query" | "high" => Ok(Some(OperationKind::Query)),
        "mutation" | "normal" => Ok(Some(OperationKind::Mutation)),
        "deletion" | "low" => Ok(Some(OperationKind::Deletion)),
        other => Err(Error::InvalidRequest(format!(
            "unknown {} '{}'",
            PRIORITY_HEADER, other
        ))),
    }
}

fn variables_of(payload: &mut GraphQlQuery) -> Result<Map<String, JsonValue>, Error> {
    match payload.variables.take() {
        None | Some(JsonValue::Null) => Ok(Map::new()),
        Some(JsonValue::Object(map)) => Ok(map),
        Some(_) => Err(Error::InvalidRequest(
            "variables must be an object".to_string(),
        )),
    }
}

fn error_response(status: StatusCode, error: &Error) -> Response {
    let error: GraphQLError = error.to_graphql_error();
    (status, Json(json!({ "errors": [error] }))).into_response()
}

async fn graphql_handler(
    State(client): State<Arc<RelayClient>>,
    headers: HeaderMap,
    Json(mut payload): Json<GraphQlQuery>,
) -> Response {
    if payload.query.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &Error::InvalidRequest("query must not be empty".to_string()),
        );
    }
    let variables = match variables_of(&mut payload) {
        Ok(variables) => variables,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let kind = match requested_kind(&headers) {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    debug!(operation = ?payload.operation_name, kind = ?kind, "Relaying operation");
    let result = match kind {
        Some(kind) => client.send_async_as(kind, &payload.query, variables).await,
        None => client.send_async(&payload.query, variables).await,
    };

    match result {
        Ok(data) => Json(json!({ "data": data })).into_response(),
        Err(e) => {
            warn!(error = %e, "Operation failed");
            let status = match e {
                Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::OK,
            };
            error_response(status, &e)
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        RelayMetrics::global().render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(requested_kind(&headers).unwrap().is_none());

        headers.insert(PRIORITY_HEADER, HeaderValue::from_static("Mutation"));
        assert_eq!(
            requested_kind(&headers).unwrap(),
            Some(OperationKind::Mutation)
        );

        headers.insert(PRIORITY_HEADER, HeaderValue::from_static("urgent"));
        assert!(requested_kind(&headers).is_err());
    }

    #[test]
    fn test_variables_must_be_an_object() {
        let mut payload = GraphQlQuery {
            query: "{ holaMundo }".to_string(),
            variables: Some(json!([1, 2])),
            operation_name: None,
        };
        assert!(variables_of(&mut payload).is_err());

        payload.variables = Some(json!({"id": 1}));
        assert_eq!(variables_of(&mut payload).unwrap().len(), 1);

        payload.variables = None;
        assert!(variables_of(&mut payload).unwrap().is_empty());
    }
}
