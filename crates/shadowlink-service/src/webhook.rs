//! Webhook event routing.
//!
//! Billing events arrive at-least-once and out of order; every handler is
//! idempotent. Replays collapse on the store's payment-event idempotency
//! key, and unknown events are a no-op, never an error.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use shadowlink_billing::oracle::BillingOracle;
use shadowlink_billing::types::{
    meta, CheckoutAction, SessionMode, SessionView, SubscriptionState, SubscriptionView,
};
use shadowlink_billing::webhook::BillingEvent;
use shadowlink_core::config::billing::BillingConfig;
use shadowlink_core::error::AppError;
use shadowlink_core::result::AppResult;
use shadowlink_database::store::{EntitlementStore, OwnerStore};
use shadowlink_entity::entitlement::{BillingGroup, EntitlementPatch, EntitlementStatus, Plan};
use shadowlink_entity::owner::{Owner, OwnerPatch};

use crate::entitlements::{CreateEntitlement, EntitlementService};
use crate::lifecycle::SubscriptionLifecycle;

/// Maps asynchronous billing events to entitlement and owner mutations.
#[derive(Debug)]
pub struct WebhookRouter {
    owners: Arc<dyn OwnerStore>,
    entitlements: Arc<dyn EntitlementStore>,
    oracle: BillingOracle,
    issuer: Arc<EntitlementService>,
    lifecycle: Arc<SubscriptionLifecycle>,
    config: BillingConfig,
}

impl WebhookRouter {
    /// Create the router.
    pub fn new(
        owners: Arc<dyn OwnerStore>,
        entitlements: Arc<dyn EntitlementStore>,
        oracle: BillingOracle,
        issuer: Arc<EntitlementService>,
        lifecycle: Arc<SubscriptionLifecycle>,
        config: BillingConfig,
    ) -> Self {
        Self {
            owners,
            entitlements,
            oracle,
            issuer,
            lifecycle,
            config,
        }
    }

    /// Dispatch one event.
    pub async fn route(&self, event: BillingEvent) -> AppResult<()> {
        match event {
            BillingEvent::CheckoutCompleted(session) => self.on_checkout_completed(session).await,
            BillingEvent::SubscriptionChanged(view) => self.sync_subscription(view, None).await,
            BillingEvent::SubscriptionDeleted(mut view) => {
                // A deleted subscription is canceled whatever its last
                // reported status said.
                view.state = SubscriptionState::Canceled;
                self.sync_subscription(view, None).await
            }
            BillingEvent::InvoicePaid { subscription_ref }
            | BillingEvent::InvoicePaymentFailed { subscription_ref } => {
                self.resync_subscription(&subscription_ref).await
            }
            BillingEvent::SessionPaymentFailed { session_ref } => {
                self.on_session_payment_failed(session_ref).await
            }
            BillingEvent::Ignored { event_type } => {
                debug!(%event_type, "Ignoring unhandled billing event");
                Ok(())
            }
        }
    }

    async fn on_checkout_completed(&self, session: SessionView) -> AppResult<()> {
        match session.mode {
            SessionMode::Subscription => self.on_subscription_checkout(session).await,
            SessionMode::Payment if session.plan_hint == Some(Plan::Lifetime) => {
                match self.resolve_owner(&session).await? {
                    Some(owner) => self.on_lifetime_payment(owner, session).await,
                    None => self.on_legacy_session(session).await,
                }
            }
            SessionMode::Payment => self.on_legacy_session(session).await,
            SessionMode::Unknown => {
                warn!(session = %session.id, "Checkout completed with unknown mode, skipping");
                Ok(())
            }
        }
    }

    /// An owner-initiated subscription checkout finished.
    async fn on_subscription_checkout(&self, session: SessionView) -> AppResult<()> {
        let Some(subscription_ref) = session.subscription_ref.clone() else {
            warn!(session = %session.id, "Subscription checkout carried no subscription");
            return Ok(());
        };

        let view = self.oracle.subscription_status(&subscription_ref).await?;

        // A brand-new subscription sometimes lands in `trialing`. Outside a
        // lifetime downgrade (whose first month is deliberately free) the
        // trial is ended so billing starts immediately.
        let view = if view.state == SubscriptionState::Trialing && !view.downgraded_from_lifetime {
            match self.oracle.end_trial_now(&subscription_ref).await {
                Ok(updated) => {
                    info!(subscription = %subscription_ref, "Converted trialing subscription to active");
                    updated
                }
                Err(e) => {
                    warn!(error = %e, "Could not end trial, proceeding with trialing state");
                    view
                }
            }
        } else {
            view
        };

        self.sync_subscription(view, Some(session.id)).await
    }

    /// A lifetime (one-time) payment completed for a known owner: finish a
    /// purchase or a monthly-to-lifetime upgrade.
    async fn on_lifetime_payment(&self, owner: Owner, session: SessionView) -> AppResult<()> {
        if !session.payment_complete {
            warn!(session = %session.id, "Lifetime payment session not paid, skipping");
            return Ok(());
        }

        // On upgrades the old subscription stays for bookkeeping but is
        // tagged and left to lapse. Retrying what the initiating call
        // already did is harmless.
        if session.action_hint == Some(CheckoutAction::Upgrade) {
            if let Some(ref subscription_ref) = owner.subscription_ref {
                if let Err(e) = self
                    .oracle
                    .set_subscription_metadata(
                        subscription_ref,
                        vec![(meta::PLAN.to_string(), Plan::Lifetime.to_string())],
                    )
                    .await
                {
                    warn!(error = %e, "Could not tag subscription after upgrade");
                }
                if let Err(e) = self
                    .oracle
                    .set_cancel_at_period_end(subscription_ref, true)
                    .await
                {
                    warn!(error = %e, "Could not schedule old subscription lapse");
                }
            }
        }

        let owner = self
            .owners
            .apply(
                owner.id,
                OwnerPatch {
                    plan: Some(Some(Plan::Lifetime)),
                    subscription_status: Some(Some("active".to_string())),
                    ..OwnerPatch::default()
                },
            )
            .await?;

        let group = BillingGroup::for_owner(&owner);
        let cascaded = self.lifecycle.cascade_to_lifetime(&group).await?;
        info!(owner = %owner.id, cascaded, "Owner upgraded to lifetime");

        // Mint the lifetime entitlement when the owner has none yet; the
        // session ref keeps replays single-shot.
        if self.entitlements.find_group(&group).await?.is_empty() {
            self.issuer
                .create(CreateEntitlement {
                    email: owner.email.clone(),
                    plan: Plan::Lifetime,
                    session_ref: Some(session.id),
                    customer_ref: owner.customer_ref.clone(),
                    subscription_ref: None,
                    subscription_status: None,
                    period_end: None,
                    status: EntitlementStatus::Active,
                })
                .await?;
        }

        Ok(())
    }

    /// The legacy path: a one-time checkout with no owner account. This is
    /// where a plain purchase turns into an entitlement record plus an
    /// activation notice.
    async fn on_legacy_session(&self, session: SessionView) -> AppResult<()> {
        if !session.payment_complete {
            warn!(session = %session.id, "Checkout session not paid, skipping entitlement");
            return Ok(());
        }
        let email = session
            .email
            .clone()
            .ok_or_else(|| AppError::validation("Checkout session carries no email"))?;
        let plan = session
            .plan_hint
            .ok_or_else(|| AppError::validation("Checkout session carries no plan"))?;

        // Enrich with live subscription data when the session created one.
        let (subscription_status, period_end) = match session.subscription_ref.as_deref() {
            Some(subscription_ref) => match self.oracle.subscription_status(subscription_ref).await
            {
                Ok(view) => (Some(view.state.to_string()), view.current_period_end),
                Err(e) => {
                    warn!(error = %e, "Could not fetch subscription details for new entitlement");
                    (None, None)
                }
            },
            None => (None, None),
        };

        let created = self
            .issuer
            .create(CreateEntitlement {
                email,
                plan,
                session_ref: Some(session.id),
                customer_ref: session.customer_ref,
                subscription_ref: session.subscription_ref,
                subscription_status,
                period_end,
                status: EntitlementStatus::Active,
            })
            .await?;

        if !created.created {
            debug!(session = %created.record.session_ref.as_deref().unwrap_or("-"), "Replayed checkout event, entitlement already exists");
        }
        Ok(())
    }

    /// Refresh from live subscription state; used for invoice events where
    /// the event itself only names the subscription.
    async fn resync_subscription(&self, subscription_ref: &str) -> AppResult<()> {
        match self.oracle.subscription_status(subscription_ref).await {
            Ok(view) => self.sync_subscription(view, None).await,
            Err(e) => {
                warn!(error = %e, subscription = %subscription_ref, "Could not resync subscription");
                Ok(())
            }
        }
    }

    /// Mirror subscription state onto the owner and cascade onto the
    /// entitlement group.
    async fn sync_subscription(
        &self,
        view: SubscriptionView,
        event_ref: Option<String>,
    ) -> AppResult<()> {
        let owner = match self.owners.find_by_subscription_ref(&view.id).await? {
            Some(owner) => Some(owner),
            None => match view.customer_ref.as_deref() {
                Some(customer_ref) => self.owners.find_by_customer_ref(customer_ref).await?,
                None => None,
            },
        };
        let Some(owner) = owner else {
            warn!(subscription = %view.id, "No owner for subscription, skipping sync");
            return Ok(());
        };

        let plan = view.plan_hint.unwrap_or(Plan::Monthly);

        let mut patch = OwnerPatch {
            subscription_ref: Some(Some(view.id.clone())),
            subscription_status: Some(Some(view.state.to_string())),
            current_period_end: Some(view.current_period_end),
            ..OwnerPatch::default()
        };
        // Lifetime is set by payment, never demoted by subscription sync.
        if plan != Plan::Lifetime && owner.plan != Some(Plan::Lifetime) {
            patch.plan = Some(Some(plan));
        }
        if view.state == SubscriptionState::Canceled {
            patch.plan = Some(None);
            patch.current_period_end = Some(None);
        }
        let owner = self.owners.apply(owner.id, patch).await?;

        let group = BillingGroup {
            subscription_ref: Some(view.id.clone()),
            customer_ref: owner.customer_ref.clone(),
            email: owner.email.clone(),
        };
        let records = self.entitlements.find_group(&group).await?;

        if matches!(
            view.state,
            SubscriptionState::Canceled | SubscriptionState::Unpaid
        ) {
            for record in records {
                if record.status != EntitlementStatus::Active {
                    continue;
                }
                let patch = EntitlementPatch {
                    status: Some(EntitlementStatus::Revoked),
                    subscription_status: Some(Some(view.state.to_string())),
                    ..EntitlementPatch::default()
                };
                match self.entitlements.apply(record.id, patch).await {
                    Ok(record) => {
                        info!(record = %record.id, email = %record.email, "Entitlement revoked by subscription state")
                    }
                    Err(e) => warn!(error = %e, "Revocation cascade skipped a record"),
                }
            }
            return Ok(());
        }

        if view.state.grants_access() {
            for record in &records {
                let record_plan = view.plan_hint.unwrap_or(record.plan);
                let mut patch = EntitlementPatch {
                    status: Some(EntitlementStatus::Active),
                    subscription_ref: Some(Some(view.id.clone())),
                    subscription_status: Some(Some(view.state.to_string())),
                    period_end: Some(view.current_period_end),
                    ..EntitlementPatch::default()
                };
                if record_plan != record.plan {
                    patch.plan = Some(record_plan);
                }
                patch.expires_at = Some(match record_plan {
                    Plan::Lifetime => None,
                    Plan::Monthly => view.current_period_end.or(record.expires_at),
                });
                if let Err(e) = self.entitlements.apply(record.id, patch).await {
                    warn!(error = %e, record = %record.id, "Refresh cascade skipped a record");
                }
            }

            // Only a just-created subscription may mint an entitlement; a
            // renewal whose records were deleted must not resurrect one.
            let window = Duration::minutes(self.config.new_subscription_window_minutes as i64);
            if records.is_empty() {
                if view.is_fresh(Utc::now(), window) {
                    self.issuer
                        .create(CreateEntitlement {
                            email: owner.email.clone(),
                            plan,
                            session_ref: Some(event_ref.unwrap_or_else(|| view.id.clone())),
                            customer_ref: owner.customer_ref.clone(),
                            subscription_ref: Some(view.id.clone()),
                            subscription_status: Some(view.state.to_string()),
                            period_end: view.current_period_end,
                            status: EntitlementStatus::Active,
                        })
                        .await?;
                } else {
                    debug!(subscription = %view.id, "No entitlements for non-fresh subscription, not creating");
                }
            }
        }

        Ok(())
    }

    /// An asynchronous payment failure after checkout: the session's
    /// entitlement, if one was minted, loses its funding.
    async fn on_session_payment_failed(&self, session_ref: Option<String>) -> AppResult<()> {
        let Some(session_ref) = session_ref else {
            return Ok(());
        };
        let Some(record) = self.entitlements.find_by_session_ref(&session_ref).await? else {
            return Ok(());
        };
        if record.status != EntitlementStatus::Active {
            return Ok(());
        }

        let patch = EntitlementPatch {
            status: Some(EntitlementStatus::Revoked),
            ..EntitlementPatch::default()
        };
        self.entitlements.apply(record.id, patch).await?;
        info!(session = %session_ref, email = %record.email, "Entitlement revoked after payment failure");
        Ok(())
    }

    async fn resolve_owner(&self, session: &SessionView) -> AppResult<Option<Owner>> {
        if let Some(owner_id) = session.owner_hint {
            if let Some(owner) = self.owners.find_by_id(owner_id).await? {
                return Ok(Some(owner));
            }
        }
        if let Some(ref customer_ref) = session.customer_ref {
            return self.owners.find_by_customer_ref(customer_ref).await;
        }
        Ok(None)
    }
}
