//! mcp402: a payment-gated MCP tool server over stateless streamable HTTP

pub mod config;
pub mod logging;
pub mod mcp;
pub mod webapp;
pub mod x402;
