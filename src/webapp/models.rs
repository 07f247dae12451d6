use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::mcp::SessionStatsSnapshot;
use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse};
use crate::x402::PaymentDestination;

/// A JSON-RPC error envelope (`id: null`) with the given HTTP status
pub fn jsonrpc_error_response(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::error(None, error))).into_response()
}

/// Empty `202 Accepted`, used when a POST carried only notifications
pub fn accepted() -> Response {
    StatusCode::ACCEPTED.into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub sessions: SessionStatsSnapshot,
    pub pay_to: PaymentDestination,
    pub payee_name: String,
}
