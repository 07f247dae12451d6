//! Payment type definitions shared by the middleware, the gate and the facilitator
//!
//! Amounts are exact decimals end to end: a price literal such as `0.01` is
//! never routed through binary floating point.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use url::Url;

use super::Network;

// ============================================================================
// Money Amount
// ============================================================================

/// Non-negative exact decimal amount of currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MoneyAmount(Decimal);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyAmountParseError {
    #[error("Failed to parse decimal")]
    DecimalParse,
    #[error("Negative amount not allowed")]
    Negative,
}

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, MoneyAmountParseError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyAmountParseError::Negative);
        }
        Ok(MoneyAmount(value))
    }

    /// `units * 10^-scale`, for price literals
    pub const fn from_units(units: u32, scale: u32) -> Self {
        MoneyAmount(Decimal::from_parts(units, 0, 0, false, scale))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str_exact(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map_err(|_| MoneyAmountParseError::DecimalParse)?;
        MoneyAmount::new(decimal)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Serialize for MoneyAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MoneyAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Accept "0.01" as well as 0.01; numbers go through their decimal text
        let value = serde_json::Value::deserialize(deserializer)?;
        let text = match &value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected decimal amount, got {}",
                    other
                )));
            }
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Destination and Claim
// ============================================================================

/// Where the payee receives funds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDestination {
    pub address: String,
    pub network: Network,
}

impl PaymentDestination {
    pub fn new(address: impl Into<String>, network: Network) -> Self {
        Self {
            address: address.into(),
            network,
        }
    }
}

impl Display for PaymentDestination {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.network)
    }
}

/// A caller's payment claim, carried in the `X-Payment` header as base64 JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentClaim {
    /// Paying identity
    pub payer: String,
    pub network: Network,
    /// Recipient the payer authorized
    pub pay_to: String,
    /// Amount the payer authorized for this invocation
    pub amount: MoneyAmount,
    /// Opaque settlement proof, forwarded untouched to the facilitator
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub proof: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("X-Payment header is not valid ASCII")]
    Encoding,
    #[error("Invalid base64 in X-Payment header: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid payment claim: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaymentClaim {
    /// Decode a claim from an `X-Payment` header value
    pub fn from_header(value: &http::HeaderValue) -> Result<Self, ClaimError> {
        let text = value.to_str().map_err(|_| ClaimError::Encoding)?;
        let bytes = b64.decode(text.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Encode this claim as an `X-Payment` header value
    pub fn to_header(&self) -> String {
        // Serializing a plain struct of strings and decimals cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        b64.encode(json)
    }
}

// ============================================================================
// Requirements and Receipts
// ============================================================================

/// Price demanded for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequirement {
    pub price: MoneyAmount,
    /// What is being paid for, quoted back to the payer
    pub description: String,
}

impl PaymentRequirement {
    pub fn new(price: MoneyAmount) -> Self {
        Self {
            price,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

/// Terms advertised to a caller that has not (sufficiently) paid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub amount: MoneyAmount,
    pub pay_to: String,
    pub payee_name: String,
    pub resource: Url,
    pub description: String,
    pub max_timeout_seconds: u64,
}

/// Evidence that an invocation was paid for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    pub amount: MoneyAmount,
    pub network: Network,
    #[serde(rename = "transactionHash", skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

// ============================================================================
// Facilitator Wire Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_claim: PaymentClaim,
    pub payment_requirements: PaymentRequirements,
}

#[derive(Deserialize)]
struct VerifyResponseHelper {
    #[serde(rename = "isValid")]
    is_valid: Option<bool>,
    success: Option<bool>,
    payer: Option<String>,
    #[serde(rename = "invalidReason", alias = "errorReason")]
    invalid_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VerifyResponse {
    Valid {
        payer: String,
    },
    Invalid {
        #[serde(rename = "invalidReason")]
        invalid_reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payer: Option<String>,
    },
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = VerifyResponseHelper::deserialize(deserializer)?;
        let is_valid = helper.is_valid.unwrap_or(false) || helper.success.unwrap_or(false);
        match (is_valid, helper.payer) {
            (true, Some(payer)) => Ok(VerifyResponse::Valid { payer }),
            (true, None) => Err(serde::de::Error::missing_field("payer")),
            (false, payer) => Ok(VerifyResponse::Invalid {
                invalid_reason: helper
                    .invalid_reason
                    .unwrap_or_else(|| "unspecified".to_string()),
                payer,
            }),
        }
    }
}

impl VerifyResponse {
    pub fn valid(payer: impl Into<String>) -> Self {
        VerifyResponse::Valid { payer: payer.into() }
    }

    pub fn invalid(payer: Option<String>, reason: impl Into<String>) -> Self {
        VerifyResponse::Invalid {
            invalid_reason: reason.into(),
            payer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub payment_claim: PaymentClaim,
    pub payment_requirements: PaymentRequirements,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// Empty strings from some facilitators are treated as no transaction
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_optional_tx")]
    pub transaction: Option<String>,
    pub network: Network,
}

fn deserialize_optional_tx<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedPaymentKind {
    pub scheme: Scheme,
    pub network: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedPaymentKindsResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> MoneyAmount {
        s.parse().unwrap()
    }

    #[test]
    fn test_money_amount_is_exact() {
        let total = Decimal::new(1, 1) + Decimal::new(2, 1);
        assert_eq!(MoneyAmount::new(total).unwrap(), amount("0.3"));
        assert!(amount("0.01") > amount("0.009999"));
        assert_eq!(amount("0.010").to_string(), "0.01");
    }

    #[test]
    fn test_money_amount_rejects_negative() {
        assert_eq!("-0.01".parse::<MoneyAmount>(), Err(MoneyAmountParseError::Negative));
        assert_eq!("abc".parse::<MoneyAmount>(), Err(MoneyAmountParseError::DecimalParse));
        assert!(serde_json::from_str::<MoneyAmount>("-1").is_err());
    }

    #[test]
    fn test_money_amount_accepts_string_and_number() {
        let from_str: MoneyAmount = serde_json::from_str("\"0.05\"").unwrap();
        let from_num: MoneyAmount = serde_json::from_str("0.05").unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(serde_json::to_string(&from_num).unwrap(), "\"0.05\"");
    }

    #[test]
    fn test_claim_header_roundtrip() {
        let claim = PaymentClaim {
            payer: "alice".to_string(),
            network: Network::Base,
            pay_to: "HQeMf9hmaus7gJhfBtPrPwPPsDLGfeVf8Aeri3uPP3Fy".to_string(),
            amount: amount("0.01"),
            proof: serde_json::json!({"signature": "0xabc"}),
        };
        let header = http::HeaderValue::from_str(&claim.to_header()).unwrap();
        assert_eq!(PaymentClaim::from_header(&header).unwrap(), claim);
    }

    #[test]
    fn test_claim_header_errors() {
        let bad_b64 = http::HeaderValue::from_static("!!!not-base64");
        assert!(matches!(PaymentClaim::from_header(&bad_b64), Err(ClaimError::Base64(_))));

        let not_claim = http::HeaderValue::from_str(&b64.encode(b"{\"payer\":1}")).unwrap();
        assert!(matches!(PaymentClaim::from_header(&not_claim), Err(ClaimError::Json(_))));
    }

    #[test]
    fn test_verify_response_parsing() {
        let valid: VerifyResponse =
            serde_json::from_str(r#"{"isValid":true,"payer":"alice"}"#).unwrap();
        assert_eq!(valid, VerifyResponse::valid("alice"));

        let invalid: VerifyResponse =
            serde_json::from_str(r#"{"isValid":false,"errorReason":"expired"}"#).unwrap();
        assert_eq!(invalid, VerifyResponse::invalid(None, "expired"));
    }

    #[test]
    fn test_settle_response_empty_transaction() {
        let resp: SettleResponse =
            serde_json::from_str(r#"{"success":true,"transaction":"","network":"base"}"#).unwrap();
        assert!(resp.transaction.is_none());
    }
}
