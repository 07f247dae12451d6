//! Built-in tools

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer};

use crate::x402::MoneyAmount;

use super::protocol::ToolCallResult;
use super::registry::{Op, RegistryError, ToolError, ToolRegistry};

/// Price charged per `add` invocation
pub const ADD_PRICE: MoneyAmount = MoneyAmount::from_units(1, 2);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddInput {
    /// The first number to add
    #[serde(deserialize_with = "operand")]
    #[schemars(with = "f64")]
    pub a: Operand,
    /// The second number to add
    #[serde(deserialize_with = "operand")]
    #[schemars(with = "f64")]
    pub b: Operand,
}

/// A numeric argument
///
/// Kept as an exact decimal whenever it fits; magnitudes or precisions
/// `Decimal` cannot hold are carried as `f64` instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Exact(Decimal),
    Float(f64),
}

impl Operand {
    fn to_f64(self) -> f64 {
        match self {
            Operand::Exact(d) => d.to_f64().unwrap_or(f64::NAN),
            Operand::Float(f) => f,
        }
    }
}

/// Sum of two operands, rendered as the tool's text result.
///
/// Going through `f64` arithmetic would turn `0.1 + 0.2` into
/// `0.30000000000000004`, so exact operands are added as decimals. Only when
/// an operand or the sum leaves the decimal range does the sum fall back to
/// `f64`.
pub fn sum(a: Operand, b: Operand) -> String {
    if let (Operand::Exact(a), Operand::Exact(b)) = (a, b) {
        if let Some(sum) = a.checked_add(b) {
            return sum.normalize().to_string();
        }
    }
    format_float(a.to_f64() + b.to_f64())
}

fn format_float(value: f64) -> String {
    match serde_json::Number::from_f64(value) {
        Some(n) => n.to_string(),
        None if value.is_nan() => "NaN".to_string(),
        None if value > 0.0 => "Infinity".to_string(),
        None => "-Infinity".to_string(),
    }
}

/// Accept a JSON number only; the shortest round-trip text of each input is
/// parsed into a `Decimal` where possible.
fn operand<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Operand, D::Error> {
    use serde::de::Error;

    let number = serde_json::Number::deserialize(deserializer)?;
    let text = number.to_string();
    if let Ok(exact) = Decimal::from_str_exact(&text).or_else(|_| Decimal::from_scientific(&text)) {
        return Ok(Operand::Exact(exact));
    }
    number
        .as_f64()
        .map(Operand::Float)
        .ok_or_else(|| D::Error::custom(format!("number {} is not representable", text)))
}

/// Adds two numbers. Paid.
pub struct AddOp;

impl Op for AddOp {
    type Input = AddInput;

    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Use this tool to add two numbers together."
    }

    fn price(&self) -> Option<MoneyAmount> {
        Some(ADD_PRICE)
    }

    async fn execute(&self, input: AddInput) -> Result<ToolCallResult, ToolError> {
        Ok(ToolCallResult::text(sum(input.a, input.b)))
    }
}

/// Registry with every built-in tool
pub fn default_registry() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(AddOp)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{ContentItem, ToolCallParams};
    use crate::mcp::registry::DispatchError;
    use crate::mcp::registry::tests::CountingGate;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    async fn add(arguments: serde_json::Value) -> Result<String, DispatchError> {
        let registry = default_registry().unwrap();
        let gate = CountingGate::new(true);
        let params = ToolCallParams { name: "add".to_string(), arguments: Some(arguments) };
        let result = registry.dispatch(params, &gate).await?;
        match &result.content[0] {
            ContentItem::Text { text } => Ok(text.clone()),
        }
    }

    #[tokio::test]
    async fn test_integer_sum() {
        assert_eq!(add(json!({"a": 2, "b": 3})).await.unwrap(), "5");
        assert_eq!(add(json!({"a": -7, "b": 3})).await.unwrap(), "-4");
    }

    #[tokio::test]
    async fn test_fractional_sum_is_exact() {
        assert_eq!(add(json!({"a": 0.1, "b": 0.2})).await.unwrap(), "0.3");
        assert_eq!(add(json!({"a": 1.5, "b": 2.5})).await.unwrap(), "4");
    }

    #[tokio::test]
    async fn test_non_numeric_rejected_before_gate() {
        let registry = default_registry().unwrap();
        let gate = CountingGate::new(true);
        for arguments in [json!({"a": "2", "b": 3}), json!({"a": true, "b": 3}), json!({"a": 2})] {
            let params = ToolCallParams { name: "add".to_string(), arguments: Some(arguments) };
            let err = registry.dispatch(params, &gate).await.unwrap_err();
            assert!(matches!(err, DispatchError::InvalidParams(_)));
        }
        assert_eq!(gate.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_falls_back_to_float() {
        assert_eq!(add(json!({"a": 7e28, "b": 7e28})).await.unwrap(), "1.4e29");
        assert_eq!(add(json!({"a": 1e300, "b": 1})).await.unwrap(), "1e300");
        assert_eq!(add(json!({"a": 1.7e308, "b": 1.7e308})).await.unwrap(), "Infinity");
    }

    #[test]
    fn test_sum_stays_exact_in_range() {
        let max = Operand::Exact(Decimal::MAX);
        assert_eq!(sum(max, Operand::Exact(Decimal::ZERO)), Decimal::MAX.to_string());
        assert_eq!(sum(Operand::Exact(Decimal::new(-5, 1)), Operand::Float(1e30)), "1e30");
    }

    #[test]
    fn test_add_metadata() {
        assert_eq!(ADD_PRICE.to_string(), "0.01");
        let registry = default_registry().unwrap();
        let info = &registry.list()[0];
        assert_eq!(info.name, "add");
        assert_eq!(info.input_schema["properties"]["a"]["type"], "number");
        assert_eq!(info.input_schema["required"], json!(["a", "b"]));
    }
}
