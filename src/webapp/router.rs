use axum::{
    Router,
    middleware,
    routing::{get, post},
};

use crate::x402::{Facilitator, payment_context};

use super::{AppState, handlers, trace};

/// Assemble the HTTP surface
///
/// - `POST /` goes through the payment middleware to the MCP bridge
/// - `GET /` and `DELETE /` answer 405 without touching payments
/// - `GET /health` is free
///
/// The MCP handler enforces `state.body_limit` itself while reading the body.
pub fn routes<F>(state: AppState<F>) -> Router
where
    F: Facilitator + Send + Sync + 'static,
{
    // route_layer only wraps the methods registered before it
    let mcp = post(handlers::mcp::mcp_post_handler::<F>)
        .route_layer(middleware::from_fn_with_state(state.payment.clone(), payment_context))
        .get(handlers::mcp::method_not_allowed)
        .delete(handlers::mcp::method_not_allowed);

    Router::new()
        .route("/", mcp)
        .route("/health", get(handlers::health::health_handler::<F>))
        .layer(middleware::from_fn(trace::trace_request))
        .with_state(state)
}
