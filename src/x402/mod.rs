//! x402-style payment integration
//!
//! - Payment context middleware for the HTTP layer
//! - Payment gate enforcing a per-invocation price
//! - Facilitator client for verification and settlement

pub mod facilitator;
pub mod gate;
pub mod middleware;
pub mod network;
pub mod types;

pub use facilitator::{Facilitator, FacilitatorClient, FacilitatorClientError};
pub use gate::{PaymentError, PaymentGate, X402Gate};
pub use middleware::{PaymentConfig, PaymentContext, X_PAYMENT_HEADER, payment_context};
pub use network::Network;
pub use types::{
    MoneyAmount, PaymentClaim, PaymentDestination, PaymentReceipt, PaymentRequirement,
    PaymentRequirements,
};
