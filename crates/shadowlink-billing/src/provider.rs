//! The billing provider capability seam.

use std::fmt;

use async_trait::async_trait;

use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::OwnerId;

use crate::types::{
    CheckoutRequest, CheckoutView, CustomerView, PricingSpec, SessionView, SubscriptionView,
};

/// Narrow surface of the external billing provider.
///
/// Implementations return the crate's view types, never provider-native
/// payloads. All methods may fail with transient errors; callers decide
/// whether a failure defers to a fallback (verification reads) or aborts
/// the operation (lifecycle writes).
#[async_trait]
pub trait BillingProvider: Send + Sync + fmt::Debug {
    /// Retrieve a subscription.
    async fn get_subscription(&self, subscription_ref: &str) -> AppResult<SubscriptionView>;

    /// Cancel a subscription immediately.
    async fn cancel_subscription(&self, subscription_ref: &str) -> AppResult<SubscriptionView>;

    /// Schedule or clear a cancel-at-period-end.
    async fn set_cancel_at_period_end(
        &self,
        subscription_ref: &str,
        cancel: bool,
    ) -> AppResult<SubscriptionView>;

    /// Merge metadata entries into a subscription.
    async fn set_subscription_metadata(
        &self,
        subscription_ref: &str,
        entries: Vec<(String, String)>,
    ) -> AppResult<()>;

    /// End an in-progress trial immediately.
    async fn end_trial_now(&self, subscription_ref: &str) -> AppResult<SubscriptionView>;

    /// Retrieve a checkout session.
    async fn get_session(&self, session_ref: &str) -> AppResult<SessionView>;

    /// Retrieve a customer.
    async fn get_customer(&self, customer_ref: &str) -> AppResult<CustomerView>;

    /// Create a customer for an owner.
    async fn create_customer(&self, email: &str, owner: OwnerId) -> AppResult<CustomerView>;

    /// Merge metadata entries into a customer.
    async fn set_customer_metadata(
        &self,
        customer_ref: &str,
        entries: Vec<(String, String)>,
    ) -> AppResult<()>;

    /// Find or create the provider price matching a pricing spec; returns
    /// the price reference.
    async fn ensure_price(&self, spec: &PricingSpec) -> AppResult<String>;

    /// Start a hosted checkout.
    async fn create_checkout(&self, request: CheckoutRequest) -> AppResult<CheckoutView>;
}
