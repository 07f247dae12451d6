//! Payment context middleware
//!
//! Runs in front of the MCP endpoint on every request. It decodes the
//! caller's `X-Payment` claim (if any) and attaches a [`PaymentContext`] to
//! the request. It does not enforce a price: prices are tool-specific and
//! are enforced later by the payment gate.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::StatusCode;
use tracing::{debug, info};
use url::Url;

use crate::mcp::protocol::{JsonRpcError, PAYMENT_REQUIRED, SERVER_ERROR};
use crate::webapp::jsonrpc_error_response;

use super::types::{
    MoneyAmount, PaymentClaim, PaymentDestination, PaymentRequirements, Scheme,
};

/// Header carrying the base64 JSON payment claim
pub const X_PAYMENT_HEADER: &str = "x-payment";

const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 600;

/// Process-wide payment configuration, immutable after startup
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Payment recipient
    pub destination: PaymentDestination,
    /// Display identity of the payee
    pub payee_name: String,
    /// Accept plain-HTTP requests (development only)
    pub allow_insecure: bool,
    /// Validity window advertised to payers
    pub max_timeout_seconds: u64,
}

impl PaymentConfig {
    pub fn new(destination: PaymentDestination, payee_name: impl Into<String>) -> Self {
        Self {
            destination,
            payee_name: payee_name.into(),
            allow_insecure: false,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
        }
    }

    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }
}

/// Per-request payment state, owned by the request and read by the gate
#[derive(Debug, Clone)]
pub struct PaymentContext {
    pub destination: PaymentDestination,
    pub payee_name: String,
    /// Absolute URL of the request, quoted back in payment requirements
    pub resource: Url,
    pub max_timeout_seconds: u64,
    /// The caller's claim, absent when no `X-Payment` header was sent
    pub claim: Option<PaymentClaim>,
}

impl PaymentContext {
    pub fn new(config: &PaymentConfig, resource: Url, claim: Option<PaymentClaim>) -> Self {
        Self {
            destination: config.destination.clone(),
            payee_name: config.payee_name.clone(),
            resource,
            max_timeout_seconds: config.max_timeout_seconds,
            claim,
        }
    }

    /// Terms for paying `price` to this context's destination
    pub fn requirements(&self, price: MoneyAmount, description: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: self.destination.network,
            amount: price,
            pay_to: self.destination.address.clone(),
            payee_name: self.payee_name.clone(),
            resource: self.resource.clone(),
            description: description.to_string(),
            max_timeout_seconds: self.max_timeout_seconds,
        }
    }
}

/// Determine the scheme the client used to reach us
///
/// Behind a TLS-terminating proxy the URI has no scheme, so
/// `X-Forwarded-Proto` is consulted; anything else is plain HTTP.
fn request_scheme(request: &Request) -> String {
    if let Some(scheme) = request.uri().scheme_str() {
        return scheme.to_ascii_lowercase();
    }
    request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "http".to_string())
}

fn request_resource(request: &Request, scheme: &str) -> Option<Url> {
    let host = request
        .uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| {
            request
                .headers()
                .get(http::header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(|h| h.to_string())
        })
        .unwrap_or_else(|| "localhost".to_string());
    Url::parse(&format!("{}://{}{}", scheme, host, request.uri().path())).ok()
}

/// Axum middleware attaching a [`PaymentContext`] to every request
///
/// Short-circuits before the bridge when the transport is insecure and not
/// allowed, or when the `X-Payment` claim is structurally invalid.
pub async fn payment_context(
    State(config): State<Arc<PaymentConfig>>,
    mut request: Request,
    next: Next,
) -> Response {
    let scheme = request_scheme(&request);
    if scheme != "https" && !config.allow_insecure {
        info!(scheme = %scheme, "< 403 insecure transport");
        return jsonrpc_error_response(
            StatusCode::FORBIDDEN,
            JsonRpcError::new(SERVER_ERROR, "HTTPS is required for paid requests."),
        );
    }

    let Some(resource) = request_resource(&request, &scheme) else {
        return jsonrpc_error_response(
            StatusCode::BAD_REQUEST,
            JsonRpcError::new(SERVER_ERROR, "Invalid Host header"),
        );
    };

    let claim = match request.headers().get(X_PAYMENT_HEADER) {
        None => None,
        Some(value) => match PaymentClaim::from_header(value) {
            Ok(claim) => Some(claim),
            Err(e) => {
                info!(error = %e, "< 402 malformed payment claim");
                return jsonrpc_error_response(
                    StatusCode::PAYMENT_REQUIRED,
                    JsonRpcError::new(PAYMENT_REQUIRED, e.to_string()),
                );
            }
        },
    };

    debug!(
        payer = claim.as_ref().map(|c| c.payer.as_str()).unwrap_or("-"),
        resource = %resource,
        "payment context attached"
    );

    let context = PaymentContext::new(&config, resource, claim);
    request.extensions_mut().insert(context);
    next.run(request).await
}
