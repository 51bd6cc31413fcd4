//! Mock billing provider for development and testing.
//!
//! Simulates the provider's subscription/session/customer objects in
//! memory without network access. Tests script its state directly; the
//! `offline` switch makes every call fail to exercise fallback paths.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::info;

use shadowlink_core::error::AppError;
use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::OwnerId;
use shadowlink_entity::entitlement::Plan;

use crate::provider::BillingProvider;
use crate::types::{
    meta, CheckoutRequest, CheckoutView, CustomerView, PricingSpec, SessionMode, SessionView,
    SubscriptionState, SubscriptionView,
};

#[derive(Debug, Default)]
struct MockState {
    subscriptions: HashMap<String, SubscriptionView>,
    sessions: HashMap<String, SessionView>,
    customers: HashMap<String, CustomerView>,
    checkouts: Vec<CheckoutRequest>,
    offline: bool,
    next_id: u64,
}

/// In-memory scriptable billing provider.
#[derive(Debug, Default)]
pub struct MockBillingProvider {
    state: Mutex<MockState>,
}

impl MockBillingProvider {
    /// Create an empty mock provider.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every provider call fail, simulating an outage.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Install or replace a subscription object.
    pub fn put_subscription(&self, view: SubscriptionView) {
        self.lock().subscriptions.insert(view.id.clone(), view);
    }

    /// Change a subscription's status.
    pub fn set_subscription_state(&self, subscription_ref: &str, state: SubscriptionState) {
        if let Some(sub) = self.lock().subscriptions.get_mut(subscription_ref) {
            sub.state = state;
        }
    }

    /// Flip a subscription's service kill switch.
    pub fn set_subscription_service_enabled(&self, subscription_ref: &str, enabled: bool) {
        if let Some(sub) = self.lock().subscriptions.get_mut(subscription_ref) {
            sub.service_enabled = enabled;
        }
    }

    /// Change a subscription's plan hint.
    pub fn set_subscription_plan_hint(&self, subscription_ref: &str, plan: Option<Plan>) {
        if let Some(sub) = self.lock().subscriptions.get_mut(subscription_ref) {
            sub.plan_hint = plan;
        }
    }

    /// Install or replace a session object.
    pub fn put_session(&self, view: SessionView) {
        self.lock().sessions.insert(view.id.clone(), view);
    }

    /// Install or replace a customer object.
    pub fn put_customer(&self, view: CustomerView) {
        self.lock().customers.insert(view.id.clone(), view);
    }

    /// Flip a customer's service kill switch.
    pub fn set_customer_service_enabled(&self, customer_ref: &str, enabled: bool) {
        if let Some(customer) = self.lock().customers.get_mut(customer_ref) {
            customer.service_enabled = enabled;
        }
    }

    /// All checkouts started through this provider, in order.
    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.lock().checkouts.clone()
    }

    /// Current state of a subscription object, if it exists.
    pub fn subscription(&self, subscription_ref: &str) -> Option<SubscriptionView> {
        self.lock().subscriptions.get(subscription_ref).cloned()
    }

    /// Mark a started checkout as paid, materializing a subscription for
    /// subscription-mode checkouts. Returns the completed session view.
    pub fn complete_checkout(&self, session_ref: &str) -> Option<SessionView> {
        let mut state = self.lock();
        state.next_id += 1;
        let sub_id = format!("sub_mock_{}", state.next_id);

        state.sessions.get_mut(session_ref)?.payment_complete = true;
        let session = state.sessions.get(session_ref)?.clone();

        if session.mode != SessionMode::Subscription || session.subscription_ref.is_some() {
            return Some(session);
        }

        let request = state
            .checkouts
            .iter()
            .rev()
            .find(|c| session.email.as_deref() == Some(c.email.as_str()))
            .cloned();
        let trialing = request.as_ref().is_some_and(|r| r.trial_days.is_some());
        let downgraded = request.as_ref().is_some_and(|r| r.downgraded_from_lifetime);

        let now = Utc::now();
        state.subscriptions.insert(
            sub_id.clone(),
            SubscriptionView {
                id: sub_id.clone(),
                customer_ref: session.customer_ref.clone(),
                state: if trialing {
                    SubscriptionState::Trialing
                } else {
                    SubscriptionState::Active
                },
                current_period_start: Some(now),
                current_period_end: Some(now + Duration::days(30)),
                cancel_at_period_end: false,
                plan_hint: session.plan_hint,
                service_enabled: true,
                created_at: Some(now),
                downgraded_from_lifetime: downgraded,
            },
        );

        let session = state.sessions.get_mut(session_ref)?;
        session.subscription_ref = Some(sub_id);
        Some(session.clone())
    }

    fn check_online(state: &MockState) -> AppResult<()> {
        if state.offline {
            Err(AppError::service_unavailable("Mock provider is offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BillingProvider for MockBillingProvider {
    async fn get_subscription(&self, subscription_ref: &str) -> AppResult<SubscriptionView> {
        let state = self.lock();
        Self::check_online(&state)?;
        state
            .subscriptions
            .get(subscription_ref)
            .cloned()
            .ok_or_else(|| AppError::billing(format!("No such subscription: {subscription_ref}")))
    }

    async fn cancel_subscription(&self, subscription_ref: &str) -> AppResult<SubscriptionView> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        let sub = state
            .subscriptions
            .get_mut(subscription_ref)
            .ok_or_else(|| AppError::billing(format!("No such subscription: {subscription_ref}")))?;
        sub.state = SubscriptionState::Canceled;
        info!(subscription = %subscription_ref, "[MockBilling] Subscription canceled");
        Ok(sub.clone())
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_ref: &str,
        cancel: bool,
    ) -> AppResult<SubscriptionView> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        let sub = state
            .subscriptions
            .get_mut(subscription_ref)
            .ok_or_else(|| AppError::billing(format!("No such subscription: {subscription_ref}")))?;
        sub.cancel_at_period_end = cancel;
        Ok(sub.clone())
    }

    async fn set_subscription_metadata(
        &self,
        subscription_ref: &str,
        entries: Vec<(String, String)>,
    ) -> AppResult<()> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        let sub = state
            .subscriptions
            .get_mut(subscription_ref)
            .ok_or_else(|| AppError::billing(format!("No such subscription: {subscription_ref}")))?;
        for (key, value) in entries {
            match key.as_str() {
                meta::SERVICE_ENABLED => sub.service_enabled = value != "false",
                meta::PLAN => sub.plan_hint = value.parse().ok(),
                _ => {}
            }
        }
        Ok(())
    }

    async fn end_trial_now(&self, subscription_ref: &str) -> AppResult<SubscriptionView> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        let sub = state
            .subscriptions
            .get_mut(subscription_ref)
            .ok_or_else(|| AppError::billing(format!("No such subscription: {subscription_ref}")))?;
        if sub.state == SubscriptionState::Trialing {
            sub.state = SubscriptionState::Active;
        }
        Ok(sub.clone())
    }

    async fn get_session(&self, session_ref: &str) -> AppResult<SessionView> {
        let state = self.lock();
        Self::check_online(&state)?;
        state
            .sessions
            .get(session_ref)
            .cloned()
            .ok_or_else(|| AppError::billing(format!("No such session: {session_ref}")))
    }

    async fn get_customer(&self, customer_ref: &str) -> AppResult<CustomerView> {
        let state = self.lock();
        Self::check_online(&state)?;
        state
            .customers
            .get(customer_ref)
            .cloned()
            .ok_or_else(|| AppError::billing(format!("No such customer: {customer_ref}")))
    }

    async fn create_customer(&self, email: &str, _owner: OwnerId) -> AppResult<CustomerView> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        state.next_id += 1;
        let customer = CustomerView {
            id: format!("cus_mock_{}", state.next_id),
            email: Some(email.to_string()),
            service_enabled: true,
        };
        state.customers.insert(customer.id.clone(), customer.clone());
        info!(customer = %customer.id, "[MockBilling] Customer created");
        Ok(customer)
    }

    async fn set_customer_metadata(
        &self,
        customer_ref: &str,
        entries: Vec<(String, String)>,
    ) -> AppResult<()> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        let customer = state
            .customers
            .get_mut(customer_ref)
            .ok_or_else(|| AppError::billing(format!("No such customer: {customer_ref}")))?;
        for (key, value) in entries {
            if key == meta::SERVICE_ENABLED {
                customer.service_enabled = value != "false";
            }
        }
        Ok(())
    }

    async fn ensure_price(&self, spec: &PricingSpec) -> AppResult<String> {
        let state = self.lock();
        Self::check_online(&state)?;
        Ok(format!("price_mock_{}", spec.plan))
    }

    async fn create_checkout(&self, request: CheckoutRequest) -> AppResult<CheckoutView> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        state.next_id += 1;
        let session_ref = format!("cs_mock_{}", state.next_id);

        let session = SessionView {
            id: session_ref.clone(),
            mode: request.mode,
            payment_complete: false,
            customer_ref: Some(request.customer_ref.clone()),
            subscription_ref: None,
            email: Some(request.email.clone()),
            plan_hint: Some(request.plan),
            owner_hint: Some(request.owner),
            action_hint: request.action,
            created_at: Some(Utc::now()),
        };
        state.sessions.insert(session_ref.clone(), session);
        state.checkouts.push(request);

        info!(session = %session_ref, "[MockBilling] Checkout started");
        Ok(CheckoutView {
            url: Some(format!("https://checkout.mock/{session_ref}")),
            session_ref,
        })
    }
}
