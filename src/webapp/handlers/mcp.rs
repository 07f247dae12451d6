//! The MCP endpoint: stateless streamable HTTP with JSON responses

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::mcp::protocol::{JsonRpcError, SERVER_ERROR};
use crate::mcp::{BridgeError, Reply, TransportSession};
use crate::webapp::models::{accepted, jsonrpc_error_response};
use crate::webapp::AppState;
use crate::x402::{Facilitator, PaymentContext};

/// POST `/`: one fresh session per request
///
/// The session is opened before the body is read, so an upload cut short
/// still opens and closes exactly one session. It is closed explicitly once
/// the response is built; if the request future is dropped first (client
/// went away) or dispatch panics, the session's `Drop` closes it instead.
pub async fn mcp_post_handler<F>(
    State(state): State<AppState<F>>,
    Extension(payment): Extension<PaymentContext>,
    headers: HeaderMap,
    body: Body,
) -> Response
where
    F: Facilitator + Send + Sync + 'static,
{
    let session = TransportSession::open(state.sessions.clone());

    if !content_type_is_json(&headers) {
        return jsonrpc_error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            JsonRpcError::new(SERVER_ERROR, "Unsupported Media Type: Content-Type must be application/json"),
        );
    }
    if !accepts_json(&headers) {
        return jsonrpc_error_response(
            StatusCode::NOT_ACCEPTABLE,
            JsonRpcError::new(SERVER_ERROR, "Not Acceptable: Client must accept application/json"),
        );
    }

    let body = match read_body(body, state.body_limit).await {
        Ok(body) => body,
        Err(response) => {
            tracing::debug!(session = session.id(), status = %response.status(), "request body not read");
            return response;
        }
    };

    let gate = state.gate(payment);
    session.connect();

    session.begin_handling();
    let outcome = AssertUnwindSafe(state.server.handle(&body, &gate))
        .catch_unwind()
        .await;

    session.begin_responding();
    let response = match outcome {
        Ok(Ok(Reply::Single(response))) => Json(response).into_response(),
        Ok(Ok(Reply::Batch(responses))) => Json(responses).into_response(),
        Ok(Ok(Reply::Accepted)) => accepted(),
        Ok(Err(err @ BridgeError::Internal(_))) => {
            tracing::error!(session = session.id(), error = %err, "Error handling MCP request");
            jsonrpc_error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_jsonrpc())
        }
        Ok(Err(err)) => {
            tracing::debug!(session = session.id(), error = %err, "rejected MCP body");
            jsonrpc_error_response(StatusCode::BAD_REQUEST, err.to_jsonrpc())
        }
        Err(panic) => {
            tracing::error!(
                session = session.id(),
                panic = panic_message(panic.as_ref()),
                "MCP request handler panicked"
            );
            jsonrpc_error_response(StatusCode::INTERNAL_SERVER_ERROR, JsonRpcError::internal())
        }
    };

    session.close();
    response
}

/// GET and DELETE on `/`: no server-initiated stream and no sessions to end
pub async fn method_not_allowed(method: Method) -> Response {
    tracing::info!("Received {} MCP request", method);
    jsonrpc_error_response(StatusCode::METHOD_NOT_ALLOWED, JsonRpcError::method_not_allowed())
}

/// Collect the request body, at most `limit` bytes
async fn read_body(body: Body, limit: usize) -> Result<Bytes, Response> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(jsonrpc_error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            JsonRpcError::new(
                SERVER_ERROR,
                format!("Payload Too Large: request body exceeds {} bytes", limit),
            ),
        )),
        Err(e) => Err(jsonrpc_error_response(
            StatusCode::BAD_REQUEST,
            JsonRpcError::new(SERVER_ERROR, format!("Failed to read request body: {}", e)),
        )),
    }
}

fn media_type(value: &str) -> String {
    value.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| media_type(v) == "application/json")
}

/// A missing `Accept` header admits anything
fn accepts_json(headers: &HeaderMap) -> bool {
    let values: Vec<&str> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        return true;
    }
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(media_type)
        .any(|m| m == "application/json" || m == "application/*" || m == "*/*")
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
