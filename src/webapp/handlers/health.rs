use axum::{Json, extract::State};

use crate::webapp::AppState;
use crate::webapp::models::HealthResponse;

/// Health check (free, not payment gated)
pub async fn health_handler<F>(State(state): State<AppState<F>>) -> Json<HealthResponse>
where
    F: Send + Sync + 'static,
{
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        sessions: state.sessions.snapshot(),
        pay_to: state.payment.destination.clone(),
        payee_name: state.payment.payee_name.clone(),
    })
}
