//! # shadowlink-service
//!
//! Business logic for the Shadow Link licensing backend: activation code
//! generation and hashing, the plan catalog, the activation verifier state
//! machine, entitlement issuance, subscription lifecycle transitions, and
//! the webhook event router.

pub mod catalog;
pub mod code;
pub mod entitlements;
pub mod lifecycle;
pub mod notify;
pub mod proration;
pub mod verifier;
pub mod webhook;

pub use catalog::{PlanCatalog, PlanPolicy};
pub use entitlements::EntitlementService;
pub use lifecycle::SubscriptionLifecycle;
pub use notify::Notifier;
pub use verifier::ActivationVerifier;
pub use webhook::WebhookRouter;
