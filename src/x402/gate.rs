//! Payment gate: the per-invocation price check
//!
//! A gate is built for one request from that request's [`PaymentContext`].
//! Every call re-verifies and re-settles the claim; nothing is cached
//! between invocations.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, info, info_span, warn};

use super::facilitator::Facilitator;
use super::middleware::PaymentContext;
use super::types::{
    MoneyAmount, PaymentReceipt, PaymentRequirement, PaymentRequirements, SettleRequest,
    VerifyRequest, VerifyResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The caller has not paid enough for this invocation
    #[error("Payment required: {reason}")]
    Required {
        reason: String,
        accepts: Vec<PaymentRequirements>,
    },
    /// The facilitator could not be consulted
    #[error("Payment facilitator failed: {0}")]
    Facilitator(String),
}

/// Precondition checked before a paid tool body runs
#[async_trait]
pub trait PaymentGate: Send + Sync {
    /// Returns normally when the caller has paid `requirement.price` for
    /// this invocation, otherwise fails and the tool must not run.
    async fn require_payment(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentReceipt, PaymentError>;

    /// Terms a caller could pay to satisfy `requirement`, for discovery
    fn advertise(&self, _requirement: &PaymentRequirement) -> Vec<PaymentRequirements> {
        Vec::new()
    }
}

/// Gate backed by a [`Facilitator`]
pub struct X402Gate<F> {
    facilitator: Arc<F>,
    context: PaymentContext,
}

impl<F> X402Gate<F> {
    pub fn new(facilitator: Arc<F>, context: PaymentContext) -> Self {
        Self {
            facilitator,
            context,
        }
    }
}

#[async_trait]
impl<F> PaymentGate for X402Gate<F>
where
    F: Facilitator + Send + Sync,
{
    async fn require_payment(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentReceipt, PaymentError> {
        let ctx = &self.context;

        if requirement.price.is_zero() {
            return Ok(PaymentReceipt {
                success: true,
                payer: ctx.claim.as_ref().map(|c| c.payer.clone()),
                amount: MoneyAmount::ZERO,
                network: ctx.destination.network,
                transaction: None,
            });
        }

        let requirements = ctx.requirements(requirement.price, &requirement.description);
        let required = |reason: String| {
            info!(reason = %reason, price = %requirement.price, "< 402");
            PaymentError::Required {
                reason,
                accepts: vec![requirements.clone()],
            }
        };

        let Some(claim) = ctx.claim.as_ref() else {
            return Err(required("no payment claim presented".to_string()));
        };
        if claim.network != ctx.destination.network {
            return Err(required(format!(
                "claim is for network {}, expected {}",
                claim.network, ctx.destination.network
            )));
        }
        if claim.pay_to != ctx.destination.address {
            return Err(required("claim pays a different destination".to_string()));
        }
        if claim.amount < requirement.price {
            return Err(required(format!(
                "insufficient payment: {} claimed, {} required",
                claim.amount, requirement.price
            )));
        }

        let verify_request = VerifyRequest {
            payment_claim: claim.clone(),
            payment_requirements: requirements.clone(),
        };
        let verified = self
            .facilitator
            .verify(&verify_request)
            .await
            .map_err(|e| PaymentError::Facilitator(e.to_string()))?;
        if let VerifyResponse::Invalid { invalid_reason, .. } = verified {
            return Err(required(format!("payment rejected: {}", invalid_reason)));
        }

        let settle_request = SettleRequest {
            payment_claim: claim.clone(),
            payment_requirements: requirements.clone(),
        };
        let span = info_span!("x402", payer = %claim.payer, net = %claim.network);
        let settled = self
            .facilitator
            .settle(&settle_request)
            .instrument(span.clone())
            .await
            .map_err(|e| PaymentError::Facilitator(e.to_string()))?;
        if !settled.success {
            let reason = settled.error_reason.unwrap_or_else(|| "unknown error".to_string());
            span.in_scope(|| warn!(reason = %reason, "Settlement failed"));
            return Err(required(format!("settlement failed: {}", reason)));
        }

        span.in_scope(|| {
            info!(
                tx = settled.transaction.as_deref().unwrap_or("?"),
                amount = %requirement.price,
                "payment settled"
            )
        });

        Ok(PaymentReceipt {
            success: true,
            payer: settled.payer.or_else(|| Some(claim.payer.clone())),
            amount: requirement.price,
            network: settled.network,
            transaction: settled.transaction,
        })
    }

    fn advertise(&self, requirement: &PaymentRequirement) -> Vec<PaymentRequirements> {
        vec![self.context.requirements(requirement.price, &requirement.description)]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::x402::types::{PaymentClaim, PaymentDestination, SettleResponse, SupportedPaymentKindsResponse};
    use crate::x402::{Network, PaymentConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    /// Facilitator double that counts calls and answers from fixed flags
    #[derive(Default)]
    pub(crate) struct MockFacilitator {
        pub verify_calls: AtomicUsize,
        pub settle_calls: AtomicUsize,
        pub reject: bool,
        pub fail_settle: bool,
        pub unreachable: bool,
        /// Settlement calls from this index on fail at the transport level
        pub settle_unreachable_from: Option<usize>,
    }

    impl Facilitator for MockFacilitator {
        type Error = String;

        async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                return Err("connection refused".to_string());
            }
            if self.reject {
                return Ok(VerifyResponse::invalid(None, "bad signature"));
            }
            Ok(VerifyResponse::valid(request.payment_claim.payer.clone()))
        }

        async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
            let call = self.settle_calls.fetch_add(1, Ordering::SeqCst);
            if self.settle_unreachable_from.is_some_and(|from| call >= from) {
                return Err("connection reset".to_string());
            }
            Ok(SettleResponse {
                success: !self.fail_settle,
                error_reason: self.fail_settle.then(|| "insufficient funds".to_string()),
                payer: Some(request.payment_claim.payer.clone()),
                transaction: (!self.fail_settle).then(|| "0xfeed".to_string()),
                network: request.payment_requirements.network,
            })
        }

        async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
            Ok(SupportedPaymentKindsResponse { kinds: vec![] })
        }
    }

    pub(crate) fn test_config() -> PaymentConfig {
        PaymentConfig::new(PaymentDestination::new("payee", Network::Base), "Test Payee")
            .allow_insecure(true)
    }

    pub(crate) fn test_claim(amount: &str) -> PaymentClaim {
        PaymentClaim {
            payer: "alice".to_string(),
            network: Network::Base,
            pay_to: "payee".to_string(),
            amount: amount.parse().unwrap(),
            proof: serde_json::json!("sig"),
        }
    }

    fn gate(facilitator: &Arc<MockFacilitator>, claim: Option<PaymentClaim>) -> X402Gate<MockFacilitator> {
        let ctx = PaymentContext::new(
            &test_config(),
            Url::parse("http://localhost:3000/").unwrap(),
            claim,
        );
        X402Gate::new(facilitator.clone(), ctx)
    }

    fn price(s: &str) -> PaymentRequirement {
        PaymentRequirement::new(s.parse().unwrap()).describe("add")
    }

    #[tokio::test]
    async fn test_missing_claim_requires_payment() {
        let facilitator = Arc::new(MockFacilitator::default());
        let err = gate(&facilitator, None).require_payment(&price("0.01")).await.unwrap_err();
        match err {
            PaymentError::Required { accepts, .. } => {
                assert_eq!(accepts.len(), 1);
                assert_eq!(accepts[0].amount.to_string(), "0.01");
                assert_eq!(accepts[0].description, "add");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_insufficient_claim_never_reaches_facilitator() {
        let facilitator = Arc::new(MockFacilitator::default());
        let err = gate(&facilitator, Some(test_claim("0.009")))
            .require_payment(&price("0.01"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Required { .. }));
        assert!(err.to_string().contains("insufficient"));
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_network_or_destination() {
        let facilitator = Arc::new(MockFacilitator::default());
        let mut claim = test_claim("1");
        claim.network = Network::BaseSepolia;
        let err = gate(&facilitator, Some(claim)).require_payment(&price("0.01")).await;
        assert!(matches!(err, Err(PaymentError::Required { .. })));

        let mut claim = test_claim("1");
        claim.pay_to = "someone-else".to_string();
        let err = gate(&facilitator, Some(claim)).require_payment(&price("0.01")).await;
        assert!(matches!(err, Err(PaymentError::Required { .. })));
    }

    #[tokio::test]
    async fn test_sufficient_claim_settles() {
        let facilitator = Arc::new(MockFacilitator::default());
        let receipt = gate(&facilitator, Some(test_claim("0.01")))
            .require_payment(&price("0.01"))
            .await
            .unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.payer.as_deref(), Some("alice"));
        assert_eq!(receipt.transaction.as_deref(), Some("0xfeed"));
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_invocation_is_rechecked() {
        let facilitator = Arc::new(MockFacilitator::default());
        let gate = gate(&facilitator, Some(test_claim("0.01")));
        gate.require_payment(&price("0.01")).await.unwrap();
        gate.require_payment(&price("0.01")).await.unwrap();
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 2);
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_claim_is_not_settled() {
        let facilitator = Arc::new(MockFacilitator { reject: true, ..Default::default() });
        let err = gate(&facilitator, Some(test_claim("0.01")))
            .require_payment(&price("0.01"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad signature"));
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_settlement_requires_payment() {
        let facilitator = Arc::new(MockFacilitator { fail_settle: true, ..Default::default() });
        let err = gate(&facilitator, Some(test_claim("0.01")))
            .require_payment(&price("0.01"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Required { .. }));
        assert!(err.to_string().contains("insufficient funds"));
    }

    #[tokio::test]
    async fn test_unreachable_facilitator_is_not_a_payment_error() {
        let facilitator = Arc::new(MockFacilitator { unreachable: true, ..Default::default() });
        let err = gate(&facilitator, Some(test_claim("0.01")))
            .require_payment(&price("0.01"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Facilitator(_)));
    }

    #[tokio::test]
    async fn test_zero_price_is_free() {
        let facilitator = Arc::new(MockFacilitator::default());
        let receipt = gate(&facilitator, None).require_payment(&price("0")).await.unwrap();
        assert_eq!(receipt.amount, MoneyAmount::ZERO);
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 0);
    }
}
