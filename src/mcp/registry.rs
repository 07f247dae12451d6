//! Tool registry and the per-call dispatch pipeline
//!
//! Tools are written against the [`Op`] trait: typed input, an async body,
//! and an optional price. The registry erases them behind [`ToolHandler`]
//! and runs every call through the same stages:
//!
//! 1. lookup by name            -> `MethodNotFound`
//! 2. typed decode of arguments -> `InvalidParams`
//! 3. payment gate (if priced)  -> `PaymentRequired`
//! 4. the op body
//!
//! Ops never see the gate; it is handed to the pipeline per request.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::x402::{MoneyAmount, PaymentError, PaymentGate, PaymentRequirement, PaymentRequirements};

use super::protocol::{JsonRpcError, ToolCallParams, ToolCallResult, ToolInfo};

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by an op body
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Reported to the caller as a tool result with `isError: true`
    #[error("{0}")]
    Failed(String),
    /// Unexpected failure; surfaced as a generic internal error
    #[error("internal tool failure: {0}")]
    Internal(String),
}

/// Why a `tools/call` did not produce a result
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Tool not found: {0}")]
    MethodNotFound(String),
    #[error("{0}")]
    InvalidParams(String),
    #[error("Payment required: {reason}")]
    PaymentRequired {
        reason: String,
        accepts: Vec<PaymentRequirements>,
    },
    #[error("{0}")]
    Internal(String),
}

impl DispatchError {
    /// True for failures that must not leak detail to the caller
    pub fn is_internal(&self) -> bool {
        matches!(self, DispatchError::Internal(_))
    }

    pub fn to_jsonrpc(&self) -> JsonRpcError {
        match self {
            DispatchError::MethodNotFound(name) => JsonRpcError::method_not_found(name),
            DispatchError::InvalidParams(msg) => JsonRpcError::invalid_params(msg.clone()),
            DispatchError::PaymentRequired { reason, accepts } => JsonRpcError::payment_required(
                format!("Payment required: {}", reason),
                Some(json!({ "accepts": accepts })),
            ),
            DispatchError::Internal(_) => JsonRpcError::internal(),
        }
    }
}

impl From<PaymentError> for DispatchError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Required { reason, accepts } => {
                DispatchError::PaymentRequired { reason, accepts }
            }
            PaymentError::Facilitator(msg) => DispatchError::Internal(msg),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),
}

// ============================================================================
// Op Trait
// ============================================================================

/// A self-describing tool: typed input, async body, optional price.
///
/// ```rust,ignore
/// struct Echo;
///
/// impl Op for Echo {
///     type Input = EchoInput;
///     fn name(&self) -> &str { "echo" }
///     fn description(&self) -> &str { "Echo text back" }
///     async fn execute(&self, input: EchoInput) -> Result<ToolCallResult, ToolError> {
///         Ok(ToolCallResult::text(input.text))
///     }
/// }
/// ```
pub trait Op: Send + Sync + 'static {
    type Input: DeserializeOwned + JsonSchema + Send;

    /// Tool name (unique within a registry)
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Price per invocation; `None` means free and the gate is skipped
    fn price(&self) -> Option<MoneyAmount> {
        None
    }

    /// The tool body. Only runs after the input decoded and payment passed.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = Result<ToolCallResult, ToolError>> + Send;

    /// Input schema derived from `Self::Input`
    fn input_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(Self::Input).schema).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Type-erased handler
// ============================================================================

/// Object-safe form of a registered tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        arguments: Option<Value>,
        gate: &dyn PaymentGate,
    ) -> Result<ToolCallResult, DispatchError>;
}

struct OpHandler<O>(O);

#[async_trait]
impl<O: Op> ToolHandler for OpHandler<O> {
    async fn call(
        &self,
        arguments: Option<Value>,
        gate: &dyn PaymentGate,
    ) -> Result<ToolCallResult, DispatchError> {
        let op = &self.0;

        let input: O::Input = serde_json::from_value(arguments.unwrap_or_else(|| json!({})))
            .map_err(|e| {
                DispatchError::InvalidParams(format!(
                    "Invalid arguments for tool {}: {}",
                    op.name(),
                    e
                ))
            })?;

        let receipt = match op.price() {
            Some(price) => {
                let requirement = PaymentRequirement::new(price).describe(op.description());
                Some(gate.require_payment(&requirement).await?)
            }
            None => None,
        };

        let result = match op.execute(input).await {
            Ok(result) => result,
            Err(ToolError::Failed(msg)) => ToolCallResult::error(msg),
            Err(ToolError::Internal(msg)) => return Err(DispatchError::Internal(msg)),
        };

        Ok(match receipt {
            Some(receipt) => result.with_meta(json!({ "x402/payment-response": receipt })),
            None => result,
        })
    }
}

/// A registered tool. Immutable once registered.
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub price: Option<MoneyAmount>,
    handler: Box<dyn ToolHandler>,
}

impl Tool {
    pub fn from_op<O: Op>(op: O) -> Self {
        Self {
            name: op.name().to_string(),
            description: op.description().to_string(),
            input_schema: op.input_schema(),
            price: op.price(),
            handler: Box::new(OpHandler(op)),
        }
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            meta: self.price.map(|price| json!({ "x402/price": price })),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// The set of invocable tools, in registration order.
///
/// Built once at startup and shared read-only (`Arc`) by every session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an op under its name
    pub fn register<O: Op>(&mut self, op: O) -> Result<(), RegistryError> {
        let tool = Tool::from_op(op);
        if self.get(&tool.name).is_some() {
            return Err(RegistryError::Duplicate(tool.name));
        }
        tracing::debug!(tool = %tool.name, price = ?tool.price.map(|p| p.to_string()), "tool registered");
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(Tool::info).collect()
    }

    /// Name, description, input schema and price of every tool
    pub fn manifest(&self) -> Value {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                    "price": t.price,
                })
            })
            .collect()
    }

    /// Run one `tools/call` through the pipeline
    pub async fn dispatch(
        &self,
        params: ToolCallParams,
        gate: &dyn PaymentGate,
    ) -> Result<ToolCallResult, DispatchError> {
        let tool = self
            .get(&params.name)
            .ok_or_else(|| DispatchError::MethodNotFound(params.name.clone()))?;
        tool.handler.call(params.arguments, gate).await
    }
}
