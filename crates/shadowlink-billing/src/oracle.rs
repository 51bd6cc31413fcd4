//! Bounded-timeout access to billing provider state.
//!
//! Every provider call is a network suspension point; the oracle wraps each
//! one in a timeout so a hung provider degrades into a transient error the
//! caller can absorb (verification falls through to its next source) rather
//! than a stalled request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use shadowlink_core::error::AppError;
use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::OwnerId;

use crate::provider::BillingProvider;
use crate::types::{
    CheckoutRequest, CheckoutView, CustomerView, PricingSpec, SessionView, SubscriptionView,
};

/// Timeout-bounded facade over a [`BillingProvider`].
#[derive(Debug, Clone)]
pub struct BillingOracle {
    provider: Arc<dyn BillingProvider>,
    timeout: Duration,
}

impl BillingOracle {
    /// Wrap a provider with a per-call timeout.
    pub fn new(provider: Arc<dyn BillingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn bounded<T, F>(&self, what: &str, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::service_unavailable(format!(
                "Billing provider timed out during {what}"
            ))),
        }
    }

    /// Authoritative subscription state.
    pub async fn subscription_status(&self, subscription_ref: &str) -> AppResult<SubscriptionView> {
        self.bounded(
            "subscription lookup",
            self.provider.get_subscription(subscription_ref),
        )
        .await
    }

    /// Legacy one-time session state.
    pub async fn session_status(&self, session_ref: &str) -> AppResult<SessionView> {
        self.bounded("session lookup", self.provider.get_session(session_ref))
            .await
    }

    /// Customer-level service kill switch, for owners with no subscription.
    pub async fn customer_service_flag(&self, customer_ref: &str) -> AppResult<bool> {
        self.bounded("customer lookup", self.provider.get_customer(customer_ref))
            .await
            .map(|customer| customer.service_enabled)
    }

    /// Retrieve a customer.
    pub async fn customer(&self, customer_ref: &str) -> AppResult<CustomerView> {
        self.bounded("customer lookup", self.provider.get_customer(customer_ref))
            .await
    }

    /// Create a customer for an owner.
    pub async fn create_customer(&self, email: &str, owner: OwnerId) -> AppResult<CustomerView> {
        self.bounded(
            "customer creation",
            self.provider.create_customer(email, owner),
        )
        .await
    }

    /// Merge metadata entries into a customer.
    pub async fn set_customer_metadata(
        &self,
        customer_ref: &str,
        entries: Vec<(String, String)>,
    ) -> AppResult<()> {
        self.bounded(
            "customer metadata update",
            self.provider.set_customer_metadata(customer_ref, entries),
        )
        .await
    }

    /// Cancel a subscription immediately.
    pub async fn cancel_subscription(&self, subscription_ref: &str) -> AppResult<SubscriptionView> {
        self.bounded(
            "subscription cancellation",
            self.provider.cancel_subscription(subscription_ref),
        )
        .await
    }

    /// Schedule or clear a cancel-at-period-end.
    pub async fn set_cancel_at_period_end(
        &self,
        subscription_ref: &str,
        cancel: bool,
    ) -> AppResult<SubscriptionView> {
        self.bounded(
            "subscription update",
            self.provider
                .set_cancel_at_period_end(subscription_ref, cancel),
        )
        .await
    }

    /// Merge metadata entries into a subscription.
    pub async fn set_subscription_metadata(
        &self,
        subscription_ref: &str,
        entries: Vec<(String, String)>,
    ) -> AppResult<()> {
        self.bounded(
            "subscription metadata update",
            self.provider
                .set_subscription_metadata(subscription_ref, entries),
        )
        .await
    }

    /// End an in-progress trial immediately.
    pub async fn end_trial_now(&self, subscription_ref: &str) -> AppResult<SubscriptionView> {
        self.bounded(
            "trial termination",
            self.provider.end_trial_now(subscription_ref),
        )
        .await
    }

    /// Find or create the provider price matching a pricing spec.
    pub async fn ensure_price(&self, spec: &PricingSpec) -> AppResult<String> {
        self.bounded("price resolution", self.provider.ensure_price(spec))
            .await
    }

    /// Start a hosted checkout.
    pub async fn create_checkout(&self, request: CheckoutRequest) -> AppResult<CheckoutView> {
        self.bounded("checkout creation", self.provider.create_checkout(request))
            .await
    }
}
