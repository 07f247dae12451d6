//! Request tracing middleware
//!
//! Every request runs inside its own root `httpd{id}` span so that session,
//! dispatch and settlement logs can be correlated.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{Instrument, info_span};

/// Short random hex correlation ID
fn gen_id() -> String {
    format!("{:06x}", rand::random::<u32>() & 0xFFFFFF)
}

/// Wrap the request in a root span (no parent, so spans never nest across
/// requests) and log the outcome once the response is ready.
pub async fn trace_request(request: Request, next: Next) -> Response {
    let id = gen_id();
    let span = info_span!(parent: None, "httpd", %id);

    async move {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let started = Instant::now();

        let response = next.run(request).await;

        let status = response.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if status.is_server_error() {
            tracing::warn!(%method, %path, status = status.as_u16(), elapsed_ms, "request failed");
        } else {
            tracing::info!(%method, %path, status = status.as_u16(), elapsed_ms, "request");
        }
        response
    }
    .instrument(span)
    .await
}
