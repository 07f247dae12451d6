use std::sync::Arc;
use std::time::Instant;

use crate::mcp::{McpServer, SessionStats, ToolRegistry};
use crate::x402::{PaymentConfig, PaymentContext, X402Gate};

/// Body limit when none is configured (1 MiB)
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 1 << 20;

/// Shared, read-only application state
///
/// Generic over the facilitator so tests can run the full router against an
/// in-process double.
pub struct AppState<F> {
    pub server: Arc<McpServer>,
    pub facilitator: Arc<F>,
    pub payment: Arc<PaymentConfig>,
    pub sessions: Arc<SessionStats>,
    /// Largest request body the MCP endpoint reads, in bytes
    pub body_limit: usize,
    /// When the server was started (for uptime tracking)
    pub started_at: Instant,
}

impl<F> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
            facilitator: self.facilitator.clone(),
            payment: self.payment.clone(),
            sessions: self.sessions.clone(),
            body_limit: self.body_limit,
            started_at: self.started_at,
        }
    }
}

impl<F> AppState<F> {
    pub fn new(registry: Arc<ToolRegistry>, facilitator: Arc<F>, payment: PaymentConfig) -> Self {
        Self {
            server: Arc::new(McpServer::new(registry)),
            facilitator,
            payment: Arc::new(payment),
            sessions: Arc::new(SessionStats::default()),
            body_limit: DEFAULT_BODY_LIMIT_BYTES,
            started_at: Instant::now(),
        }
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    /// Gate for one request, bound to that request's payment context
    pub fn gate(&self, context: PaymentContext) -> X402Gate<F> {
        X402Gate::new(self.facilitator.clone(), context)
    }
}
