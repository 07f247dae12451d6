pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod trace;

pub use models::{HealthResponse, jsonrpc_error_response};
pub use state::AppState;

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use clap::Args;

use crate::config::GlobalConfig;
use crate::mcp::ToolRegistry;
use crate::x402::Facilitator;

/// Creates the axum app with all routes and state configured
///
/// Returns the router together with its state, so callers can inspect the
/// facilitator or session counters.
pub fn create_app<F>(
    config: &GlobalConfig,
    registry: Arc<ToolRegistry>,
    facilitator: Arc<F>,
    body_limit: usize,
) -> Result<(Router, AppState<F>)>
where
    F: Facilitator + Send + Sync + 'static,
{
    let state =
        AppState::new(registry, facilitator, config.payment_config()?).with_body_limit(body_limit);
    Ok((router::routes(state.clone()), state))
}

/// Parse a byte size string like "1MiB", "500KB", "2M", or raw bytes "1048576"
fn parse_bytes(size_str: &str) -> Result<usize> {
    let s = size_str.trim().to_lowercase();
    if let Ok(n) = s.parse::<usize>() {
        return Ok(n);
    }

    const UNITS: &[(&str, usize)] = &[
        ("gib", 1 << 30),
        ("mib", 1 << 20),
        ("kib", 1 << 10),
        ("gb", 1_000_000_000),
        ("mb", 1_000_000),
        ("kb", 1_000),
        ("g", 1_000_000_000),
        ("m", 1_000_000),
        ("k", 1_000),
    ];
    let (num, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, *mult)))
        .ok_or_else(|| anyhow::anyhow!("Invalid size format: {}. Use KB, MB, GB, KiB, MiB, GiB or raw bytes", size_str))?;

    let num: usize = num
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid number in size: {}", size_str))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Size too large: {}", size_str))
}

pub const DEFAULT_BODY_LIMIT: &str = "1MiB";

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Maximum request body size (e.g., "1MiB", "512KB", "1048576")
    #[arg(long, value_name = "SIZE", default_value = DEFAULT_BODY_LIMIT)]
    pub body_limit: String,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self { body_limit: DEFAULT_BODY_LIMIT.to_string() }
    }
}

/// Serve until interrupted
///
/// On Ctrl-C the server stops accepting and returns immediately; in-flight
/// requests are not drained.
pub async fn run(args: ServeArgs, config: &GlobalConfig) -> Result<()> {
    let body_limit = parse_bytes(&args.body_limit)?;
    let facilitator = Arc::new(config.facilitator()?);
    let registry = Arc::new(crate::mcp::default_registry()?);

    let (app, state) = create_app(config, registry, facilitator, body_limit)?;

    let payment_networks: Vec<String> = match state.facilitator.supported().await {
        Ok(supported) => supported
            .kinds
            .iter()
            .map(|k| format!("{} ({:?})", k.network, k.scheme))
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to query facilitator, payments may not work");
            vec![]
        }
    };

    let addr = format!("0.0.0.0:{}", config.port());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        pay_to = %state.payment.destination,
        payee = %state.payment.payee_name,
        facilitator = config.facilitator_url.as_deref().unwrap_or("-"),
        networks = ?payment_networks,
        tools = ?state.server.registry().tools().iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        listen = %listener.local_addr()?,
        "Server started"
    );
    if state.payment.destination.network.is_testnet() {
        tracing::warn!(
            network = %state.payment.destination.network,
            "Payments settle on a testnet; callers pay nothing of value"
        );
    }
    if state.payment.allow_insecure {
        tracing::warn!("Plain HTTP is allowed for paid requests; use only in development");
    }

    tokio::select! {
        result = axum::serve(listener, app).into_future() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down server");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("1048576").unwrap(), 1 << 20);
        assert_eq!(parse_bytes("1MiB").unwrap(), 1 << 20);
        assert_eq!(parse_bytes("512KB").unwrap(), 512_000);
        assert_eq!(parse_bytes(" 2m ").unwrap(), 2_000_000);
        assert!(parse_bytes("lots").is_err());
        assert!(parse_bytes("1.5MB").is_err());
    }
}
