//! MCP (Model Context Protocol) server side
//!
//! - JSON-RPC envelope and MCP message types ([`protocol`])
//! - Tool registry with a payment-gated dispatch pipeline ([`registry`])
//! - The built-in `add` tool ([`tools`])
//! - The bridge from a POST body to JSON-RPC responses ([`server`])
//! - Per-request session lifecycle ([`session`])

pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod tools;

pub use registry::{DispatchError, Op, RegistryError, Tool, ToolError, ToolRegistry};
pub use server::{BridgeError, McpServer, Reply};
pub use session::{SessionState, SessionStats, SessionStatsSnapshot, TransportSession};
pub use tools::{AddOp, default_registry};
