//! Subscription lifecycle transitions.
//!
//! Each operation is idempotent or safely retryable. The transition's own
//! provider call must succeed before local state changes; provider failures
//! inside a cascade are logged and do not abort the rest of the cascade.
//! Revocation and deletion tolerate a provider that already considers the
//! subscription canceled.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use shadowlink_billing::oracle::BillingOracle;
use shadowlink_billing::price::PriceResolver;
use shadowlink_billing::types::{
    meta, CheckoutAction, CheckoutLine, CheckoutRequest, PricingSpec, SessionMode,
};
use shadowlink_core::config::billing::BillingConfig;
use shadowlink_core::error::AppError;
use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::OwnerId;
use shadowlink_database::store::{EntitlementStore, OwnerStore};
use shadowlink_entity::entitlement::{BillingGroup, EntitlementPatch, EntitlementStatus, Plan};
use shadowlink_entity::owner::{Owner, OwnerPatch};

use crate::catalog::PlanCatalog;
use crate::proration::{ProrationPolicy, UpgradeCharge};

/// A lifecycle transition to apply to an owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Start a checkout for a plan purchase.
    Checkout {
        /// Plan to purchase.
        plan: Plan,
    },
    /// Upgrade or downgrade between plans.
    ChangePlan {
        /// Target plan.
        target: Plan,
    },
    /// Cancel the subscription, deferred or immediately.
    Cancel {
        /// Cancel now and revoke, instead of at period end.
        immediate: bool,
    },
    /// Hard stop regardless of plan type.
    Revoke,
    /// Clear a deferred cancellation and restore entitlements.
    Reactivate,
    /// Disable service via the provider-side kill switch.
    StopService,
    /// Re-enable service after validating the plan is still live.
    StartService,
    /// Irreversibly delete the subscription and all entitlements.
    Delete,
}

/// What a lifecycle transition did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// A hosted checkout was started; completion arrives via webhook.
    CheckoutStarted {
        /// Provider session reference.
        session_ref: String,
        /// Hosted checkout URL.
        url: Option<String>,
    },
    /// The plan changed immediately (free upgrade path).
    PlanChanged {
        /// The new plan.
        plan: Plan,
        /// Entitlement records cascaded.
        cascaded: u64,
    },
    /// Cancellation was scheduled for period end.
    CancelScheduled {
        /// When access will lapse.
        period_end: Option<DateTime<Utc>>,
    },
    /// The subscription was canceled immediately.
    Canceled {
        /// Entitlement records revoked.
        revoked: u64,
    },
    /// Everything was revoked.
    Revoked {
        /// Entitlement records revoked.
        revoked: u64,
    },
    /// The deferred cancellation was cleared.
    Reactivated {
        /// Entitlement records restored.
        restored: u64,
    },
    /// The service kill switch was turned off.
    ServiceStopped {
        /// Entitlement records revoked.
        revoked: u64,
    },
    /// The service kill switch was turned back on.
    ServiceStarted {
        /// Entitlement records restored.
        restored: u64,
    },
    /// The subscription and its entitlements were deleted.
    Deleted {
        /// Entitlement records removed.
        removed: u64,
    },
}

/// Live subscription overview for an owner.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionOverview {
    /// Current plan.
    pub plan: Option<Plan>,
    /// Subscription status (mirrored or live).
    pub status: Option<String>,
    /// Current period end.
    pub current_period_end: Option<DateTime<Utc>>,
    /// Provider subscription reference.
    pub subscription_ref: Option<String>,
    /// Out-of-band kill switch state.
    pub service_enabled: bool,
    /// Whether a deferred cancellation is scheduled.
    pub cancel_at_period_end: bool,
}

/// Orchestrates owner-level subscription transitions and their cascades
/// onto entitlement records.
#[derive(Debug)]
pub struct SubscriptionLifecycle {
    owners: Arc<dyn OwnerStore>,
    entitlements: Arc<dyn EntitlementStore>,
    oracle: BillingOracle,
    prices: Arc<PriceResolver>,
    catalog: PlanCatalog,
    proration: ProrationPolicy,
    config: BillingConfig,
}

impl SubscriptionLifecycle {
    /// Create the lifecycle manager.
    pub fn new(
        owners: Arc<dyn OwnerStore>,
        entitlements: Arc<dyn EntitlementStore>,
        oracle: BillingOracle,
        prices: Arc<PriceResolver>,
        catalog: PlanCatalog,
        config: BillingConfig,
    ) -> Self {
        Self {
            owners,
            entitlements,
            oracle,
            prices,
            proration: ProrationPolicy::from_config(&config.proration),
            catalog,
            config,
        }
    }

    /// Apply a transition to an owner.
    pub async fn apply(&self, owner_id: OwnerId, transition: Transition) -> AppResult<Outcome> {
        let owner = self.owner(owner_id).await?;
        match transition {
            Transition::Checkout { plan } => self.checkout(owner, plan).await,
            Transition::ChangePlan { target } => self.change_plan(owner, target).await,
            Transition::Cancel { immediate } => self.cancel(owner, immediate).await,
            Transition::Revoke => self.revoke(owner).await,
            Transition::Reactivate => self.reactivate(owner).await,
            Transition::StopService => self.stop_service(owner).await,
            Transition::StartService => self.start_service(owner).await,
            Transition::Delete => self.delete(owner).await,
        }
    }

    /// Start a checkout for a plain plan purchase.
    async fn checkout(&self, owner: Owner, plan: Plan) -> AppResult<Outcome> {
        self.require_enabled()?;
        let (owner, customer_ref) = self.ensure_customer(owner).await?;

        let price_ref = self.prices.resolve(&self.pricing_spec(plan)).await?;
        let checkout = self
            .oracle
            .create_checkout(CheckoutRequest {
                customer_ref,
                mode: checkout_mode(plan),
                line: CheckoutLine::Price(price_ref),
                plan,
                email: owner.email.clone(),
                owner: owner.id,
                action: Some(CheckoutAction::Purchase),
                downgraded_from_lifetime: false,
                trial_days: None,
                success_url: self.config.checkout_success_url.clone(),
                cancel_url: self.config.checkout_cancel_url.clone(),
            })
            .await?;

        info!(owner = %owner.id, %plan, session = %checkout.session_ref, "Checkout started");
        Ok(Outcome::CheckoutStarted {
            session_ref: checkout.session_ref,
            url: checkout.url,
        })
    }

    /// Upgrade or downgrade between the two plans.
    async fn change_plan(&self, owner: Owner, target: Plan) -> AppResult<Outcome> {
        self.require_enabled()?;

        if owner.plan == Some(target) {
            return Err(AppError::validation(format!(
                "Owner already has the {target} plan"
            )));
        }

        match (owner.plan, target) {
            (Some(Plan::Lifetime), Plan::Monthly) => self.downgrade_to_monthly(owner).await,
            (Some(Plan::Monthly), Plan::Lifetime) => self.upgrade_to_lifetime(owner).await,
            _ => Err(AppError::validation(
                "Plan change requires an existing monthly or lifetime plan",
            )),
        }
    }

    /// Lifetime → monthly: a new subscription checkout whose first period
    /// is free (trial), so the customer is not charged for the switch.
    async fn downgrade_to_monthly(&self, owner: Owner) -> AppResult<Outcome> {
        let (owner, customer_ref) = self.ensure_customer(owner).await?;

        let price_ref = self
            .prices
            .resolve(&self.pricing_spec(Plan::Monthly))
            .await?;
        let checkout = self
            .oracle
            .create_checkout(CheckoutRequest {
                customer_ref,
                mode: SessionMode::Subscription,
                line: CheckoutLine::Price(price_ref),
                plan: Plan::Monthly,
                email: owner.email.clone(),
                owner: owner.id,
                action: Some(CheckoutAction::Downgrade),
                downgraded_from_lifetime: true,
                trial_days: Some(self.config.downgrade_trial_days),
                success_url: self.config.checkout_success_url.clone(),
                cancel_url: self.config.checkout_cancel_url.clone(),
            })
            .await?;

        info!(owner = %owner.id, session = %checkout.session_ref, "Downgrade checkout started (first period free)");
        Ok(Outcome::CheckoutStarted {
            session_ref: checkout.session_ref,
            url: checkout.url,
        })
    }

    /// Monthly → lifetime: credit the unused remainder of the current
    /// period against the lifetime price. A positive difference is
    /// collected via a one-off charge; a covered difference flips the plan
    /// immediately for free.
    async fn upgrade_to_lifetime(&self, owner: Owner) -> AppResult<Outcome> {
        let subscription_ref = owner
            .subscription_ref
            .clone()
            .ok_or_else(|| AppError::validation("No active subscription to upgrade"))?;

        let view = self.oracle.subscription_status(&subscription_ref).await?;
        let now = Utc::now();
        let (period_start, period_end) = match (view.current_period_start, view.current_period_end)
        {
            (Some(start), Some(end)) => (start, end),
            // Without period boundaries there is nothing to credit.
            _ => (now, now),
        };

        let monthly = self.catalog.resolve(Plan::Monthly).price_cents;
        let lifetime = self.catalog.resolve(Plan::Lifetime).price_cents;
        let charge = self
            .proration
            .upgrade_charge(monthly, lifetime, period_start, period_end, now);

        // Mark the old subscription as upgraded and let it lapse at period
        // end; it stays around for bookkeeping. Best-effort: the upgrade
        // itself does not depend on it.
        if let Err(e) = self
            .oracle
            .set_subscription_metadata(
                &subscription_ref,
                vec![(meta::PLAN.to_string(), Plan::Lifetime.to_string())],
            )
            .await
        {
            warn!(error = %e, "Could not tag subscription as upgraded");
        }
        if let Err(e) = self
            .oracle
            .set_cancel_at_period_end(&subscription_ref, true)
            .await
        {
            warn!(error = %e, "Could not schedule old subscription lapse");
        }

        match charge {
            UpgradeCharge::FreeFlip => {
                self.owners
                    .apply(
                        owner.id,
                        OwnerPatch {
                            plan: Some(Some(Plan::Lifetime)),
                            subscription_status: Some(Some("active".to_string())),
                            current_period_end: Some(None),
                            ..OwnerPatch::default()
                        },
                    )
                    .await?;

                let cascaded = self.cascade_to_lifetime(&BillingGroup::for_owner(&owner)).await?;
                info!(owner = %owner.id, cascaded, "Upgraded to lifetime without charge");
                Ok(Outcome::PlanChanged {
                    plan: Plan::Lifetime,
                    cascaded,
                })
            }
            UpgradeCharge::Charge(amount_cents) => {
                let (owner, customer_ref) = self.ensure_customer(owner).await?;
                let checkout = self
                    .oracle
                    .create_checkout(CheckoutRequest {
                        customer_ref,
                        mode: SessionMode::Payment,
                        line: CheckoutLine::Amount {
                            name: "Upgrade to Lifetime Plan".to_string(),
                            description: format!(
                                "Price difference: ${:.2}",
                                amount_cents as f64 / 100.0
                            ),
                            amount_cents,
                        },
                        plan: Plan::Lifetime,
                        email: owner.email.clone(),
                        owner: owner.id,
                        action: Some(CheckoutAction::Upgrade),
                        downgraded_from_lifetime: false,
                        trial_days: None,
                        success_url: self.config.checkout_success_url.clone(),
                        cancel_url: self.config.checkout_cancel_url.clone(),
                    })
                    .await?;

                info!(owner = %owner.id, amount_cents, session = %checkout.session_ref, "Upgrade checkout started");
                Ok(Outcome::CheckoutStarted {
                    session_ref: checkout.session_ref,
                    url: checkout.url,
                })
            }
        }
    }

    /// Cascade every record in the group to the lifetime plan.
    ///
    /// Never creates a second entitlement for a plan change; existing
    /// records flip in place.
    pub(crate) async fn cascade_to_lifetime(&self, group: &BillingGroup) -> AppResult<u64> {
        let records = self.entitlements.find_group(group).await?;
        let mut cascaded = 0;
        for record in records {
            let patch = EntitlementPatch {
                plan: Some(Plan::Lifetime),
                status: Some(EntitlementStatus::Active),
                expires_at: Some(None),
                ..EntitlementPatch::default()
            };
            match self.entitlements.apply(record.id, patch).await {
                Ok(_) => cascaded += 1,
                Err(e) => warn!(error = %e, record = %record.id, "Lifetime cascade skipped a record"),
            }
        }
        Ok(cascaded)
    }

    /// Cancel the subscription: deferred (default) or immediate.
    async fn cancel(&self, owner: Owner, immediate: bool) -> AppResult<Outcome> {
        self.require_enabled()?;
        let subscription_ref = owner
            .subscription_ref
            .clone()
            .ok_or_else(|| AppError::validation("No active subscription to cancel"))?;
        let group = BillingGroup::for_owner(&owner);

        if immediate {
            // The provider cancellation must succeed before any local state
            // is marked canceled.
            self.oracle.cancel_subscription(&subscription_ref).await?;

            self.owners
                .apply(
                    owner.id,
                    OwnerPatch {
                        subscription_status: Some(Some("canceled".to_string())),
                        current_period_end: Some(None),
                        ..OwnerPatch::default()
                    },
                )
                .await?;

            let revoked = self.revoke_group(&group, Some("canceled")).await?;
            info!(owner = %owner.id, revoked, "Subscription canceled immediately");
            Ok(Outcome::Canceled { revoked })
        } else {
            let view = self
                .oracle
                .set_cancel_at_period_end(&subscription_ref, true)
                .await?;

            self.owners
                .apply(
                    owner.id,
                    OwnerPatch {
                        subscription_status: Some(Some(view.state.to_string())),
                        ..OwnerPatch::default()
                    },
                )
                .await?;

            // Entitlements stay active until the period truly elapses; only
            // the mirrored status refreshes.
            let records = self.entitlements.find_group(&group).await?;
            for record in records {
                let patch = EntitlementPatch {
                    subscription_status: Some(Some(view.state.to_string())),
                    ..EntitlementPatch::default()
                };
                if let Err(e) = self.entitlements.apply(record.id, patch).await {
                    warn!(error = %e, record = %record.id, "Status mirror skipped a record");
                }
            }

            info!(owner = %owner.id, period_end = ?view.current_period_end, "Cancellation scheduled for period end");
            Ok(Outcome::CancelScheduled {
                period_end: view.current_period_end,
            })
        }
    }

    /// Hard stop regardless of plan type, lifetime included.
    async fn revoke(&self, owner: Owner) -> AppResult<Outcome> {
        if owner.subscription_ref.is_none() && !owner.is_lifetime() {
            return Err(AppError::validation(
                "No active subscription or lifetime plan to revoke",
            ));
        }
        let group = BillingGroup::for_owner(&owner);
        let had_subscription = owner.subscription_ref.is_some();

        if let Some(ref subscription_ref) = owner.subscription_ref {
            if self.config.enabled {
                // Already-canceled provider-side is a success, not an error.
                if let Err(e) = self.oracle.cancel_subscription(subscription_ref).await {
                    warn!(error = %e, "Provider cancel failed during revoke (may already be canceled)");
                }
            }
        }

        self.owners
            .apply(
                owner.id,
                OwnerPatch {
                    subscription_status: Some(Some("canceled".to_string())),
                    plan: Some(None),
                    current_period_end: Some(None),
                    ..OwnerPatch::default()
                },
            )
            .await?;

        let mirror = had_subscription.then_some("canceled");
        let revoked = self.revoke_group(&group, mirror).await?;
        info!(owner = %owner.id, revoked, "Subscription revoked");
        Ok(Outcome::Revoked { revoked })
    }

    /// Clear a deferred cancellation and restore the group.
    async fn reactivate(&self, owner: Owner) -> AppResult<Outcome> {
        self.require_enabled()?;
        let subscription_ref = owner
            .subscription_ref
            .clone()
            .ok_or_else(|| AppError::validation("No subscription to reactivate"))?;

        let view = self
            .oracle
            .set_cancel_at_period_end(&subscription_ref, false)
            .await?;

        self.owners
            .apply(
                owner.id,
                OwnerPatch {
                    subscription_status: Some(Some(view.state.to_string())),
                    current_period_end: Some(view.current_period_end),
                    ..OwnerPatch::default()
                },
            )
            .await?;

        let group = BillingGroup::for_owner(&owner);
        let records = self.entitlements.find_group(&group).await?;
        let mut restored = 0;
        for record in records {
            let mut patch = EntitlementPatch {
                status: Some(EntitlementStatus::Active),
                subscription_status: Some(Some(view.state.to_string())),
                period_end: Some(view.current_period_end),
                ..EntitlementPatch::default()
            };
            if record.plan == Plan::Monthly && view.current_period_end.is_some() {
                patch.expires_at = Some(view.current_period_end);
            }
            match self.entitlements.apply(record.id, patch).await {
                Ok(_) => restored += 1,
                Err(e) => warn!(error = %e, record = %record.id, "Reactivation skipped a record"),
            }
        }

        info!(owner = %owner.id, restored, "Subscription reactivated");
        Ok(Outcome::Reactivated { restored })
    }

    /// Turn the provider-side service kill switch off and revoke.
    async fn stop_service(&self, owner: Owner) -> AppResult<Outcome> {
        self.require_enabled()?;
        let disabled = vec![(meta::SERVICE_ENABLED.to_string(), "false".to_string())];

        if let Some(ref subscription_ref) = owner.subscription_ref {
            self.oracle
                .set_subscription_metadata(subscription_ref, disabled)
                .await?;
        } else if let Some(ref customer_ref) = owner.customer_ref {
            self.oracle
                .set_customer_metadata(customer_ref, disabled)
                .await?;
        } else {
            return Err(AppError::validation(
                "No billing subscription or customer to disable",
            ));
        }

        let revoked = self
            .revoke_group(&BillingGroup::for_owner(&owner), None)
            .await?;
        info!(owner = %owner.id, revoked, "Service stopped");
        Ok(Outcome::ServiceStopped { revoked })
    }

    /// Turn the kill switch back on, but only when the underlying plan is
    /// still live; an elapsed period is never silently resurrected.
    async fn start_service(&self, owner: Owner) -> AppResult<Outcome> {
        self.require_enabled()?;
        let now = Utc::now();

        let (valid, period_elapsed) = if let Some(ref subscription_ref) = owner.subscription_ref {
            let view = self.oracle.subscription_status(subscription_ref).await?;
            (
                view.state.grants_access(),
                view.current_period_end.is_some_and(|end| end <= now),
            )
        } else if owner.is_lifetime() {
            (true, false)
        } else {
            match owner.current_period_end {
                Some(end) => (end > now, end <= now),
                None => (false, false),
            }
        };

        if period_elapsed || !valid {
            return Err(AppError::validation(
                "Subscription is expired or inactive; a new purchase is required",
            ));
        }

        let enabled = vec![(meta::SERVICE_ENABLED.to_string(), "true".to_string())];
        if let Some(ref subscription_ref) = owner.subscription_ref {
            self.oracle
                .set_subscription_metadata(subscription_ref, enabled)
                .await?;
        } else if let Some(ref customer_ref) = owner.customer_ref {
            self.oracle
                .set_customer_metadata(customer_ref, enabled)
                .await?;
        } else {
            return Err(AppError::validation(
                "No billing subscription or customer to enable",
            ));
        }

        let group = BillingGroup::for_owner(&owner);
        let records = self.entitlements.find_group(&group).await?;
        let mut restored = 0;
        for record in records {
            if record.status != EntitlementStatus::Revoked {
                continue;
            }

            let mut patch = EntitlementPatch {
                status: Some(EntitlementStatus::Active),
                ..EntitlementPatch::default()
            };
            let should_restore = match record.plan {
                Plan::Lifetime => true,
                Plan::Monthly => {
                    if let Some(ref subscription_ref) = record.subscription_ref {
                        match self.oracle.subscription_status(subscription_ref).await {
                            Ok(view) if view.state.grants_access() => {
                                patch.subscription_status = Some(Some(view.state.to_string()));
                                if view.current_period_end.is_some() {
                                    patch.period_end = Some(view.current_period_end);
                                    patch.expires_at = Some(view.current_period_end);
                                }
                                true
                            }
                            Ok(_) => false,
                            Err(e) => {
                                warn!(error = %e, record = %record.id, "Could not re-validate record for restart");
                                false
                            }
                        }
                    } else {
                        !record.is_expired(now)
                    }
                }
            };

            if should_restore {
                match self.entitlements.apply(record.id, patch).await {
                    Ok(_) => restored += 1,
                    Err(e) => warn!(error = %e, record = %record.id, "Service start skipped a record"),
                }
            }
        }

        info!(owner = %owner.id, restored, "Service started");
        Ok(Outcome::ServiceStarted { restored })
    }

    /// Irreversible: cancel provider-side, delete every record, clear the
    /// owner's subscription fields. The customer reference is kept for
    /// future repurchase.
    async fn delete(&self, owner: Owner) -> AppResult<Outcome> {
        let group = BillingGroup::for_owner(&owner);

        if let Some(ref subscription_ref) = owner.subscription_ref {
            if self.config.enabled {
                if let Err(e) = self.oracle.cancel_subscription(subscription_ref).await {
                    warn!(error = %e, "Provider cancel failed during delete (may already be canceled)");
                }
            }
        }

        let removed = self.entitlements.delete_group(&group).await?;

        self.owners
            .apply(
                owner.id,
                OwnerPatch {
                    subscription_ref: Some(None),
                    subscription_status: Some(None),
                    plan: Some(None),
                    current_period_end: Some(None),
                    ..OwnerPatch::default()
                },
            )
            .await?;

        info!(owner = %owner.id, removed, "Subscription deleted");
        Ok(Outcome::Deleted { removed })
    }

    /// Live overview of an owner's subscription.
    pub async fn overview(&self, owner_id: OwnerId) -> AppResult<SubscriptionOverview> {
        let owner = self.owner(owner_id).await?;

        // Lifetime is never synced from a subscription: it has none, and a
        // stale subscription object must not demote it.
        if owner.is_lifetime() {
            let service_enabled = match owner.customer_ref.as_deref() {
                Some(customer_ref) if self.config.enabled => self
                    .oracle
                    .customer_service_flag(customer_ref)
                    .await
                    .unwrap_or(true),
                _ => true,
            };
            return Ok(SubscriptionOverview {
                plan: Some(Plan::Lifetime),
                status: Some("active".to_string()),
                current_period_end: None,
                subscription_ref: None,
                service_enabled,
                cancel_at_period_end: false,
            });
        }

        if let Some(ref subscription_ref) = owner.subscription_ref {
            if self.config.enabled {
                match self.oracle.subscription_status(subscription_ref).await {
                    Ok(view) => {
                        let owner = self
                            .owners
                            .apply(
                                owner.id,
                                OwnerPatch {
                                    subscription_status: Some(Some(view.state.to_string())),
                                    current_period_end: Some(view.current_period_end),
                                    ..OwnerPatch::default()
                                },
                            )
                            .await?;
                        return Ok(SubscriptionOverview {
                            plan: owner.plan,
                            status: Some(view.state.to_string()),
                            current_period_end: view.current_period_end,
                            subscription_ref: Some(subscription_ref.clone()),
                            service_enabled: view.service_enabled,
                            cancel_at_period_end: view.cancel_at_period_end,
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Falling back to mirrored subscription state");
                    }
                }
            }
        }

        let service_enabled = match owner.customer_ref.as_deref() {
            Some(customer_ref) if self.config.enabled => self
                .oracle
                .customer_service_flag(customer_ref)
                .await
                .unwrap_or(true),
            _ => true,
        };
        Ok(SubscriptionOverview {
            plan: owner.plan,
            status: owner.subscription_status.clone(),
            current_period_end: owner.current_period_end,
            subscription_ref: owner.subscription_ref.clone(),
            service_enabled,
            cancel_at_period_end: false,
        })
    }

    async fn owner(&self, owner_id: OwnerId) -> AppResult<Owner> {
        self.owners
            .find_by_id(owner_id)
            .await?
            .ok_or_else(|| AppError::not_found("Owner not found"))
    }

    fn require_enabled(&self) -> AppResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(AppError::configuration(
                "Billing provider is not configured",
            ))
        }
    }

    fn pricing_spec(&self, plan: Plan) -> PricingSpec {
        let policy = self.catalog.resolve(plan);
        PricingSpec {
            plan,
            product_name: format!("{} - {}", self.config.product_prefix, policy.label),
            description: policy.description.clone(),
            amount_cents: policy.price_cents,
            recurring_monthly: plan == Plan::Monthly,
        }
    }

    /// Ensure the owner has a billing customer, creating one on demand.
    async fn ensure_customer(&self, owner: Owner) -> AppResult<(Owner, String)> {
        if let Some(ref customer_ref) = owner.customer_ref {
            let customer_ref = customer_ref.clone();
            return Ok((owner, customer_ref));
        }

        let customer = self
            .oracle
            .create_customer(&owner.email, owner.id)
            .await?;
        let owner = self
            .owners
            .apply(
                owner.id,
                OwnerPatch {
                    customer_ref: Some(Some(customer.id.clone())),
                    ..OwnerPatch::default()
                },
            )
            .await?;
        info!(owner = %owner.id, customer = %customer.id, "Billing customer created");
        Ok((owner, customer.id))
    }

    /// Revoke every active record in the group; provider-free, so failures
    /// here are store failures and only skip the affected record.
    pub(crate) async fn revoke_group(
        &self,
        group: &BillingGroup,
        mirror_status: Option<&str>,
    ) -> AppResult<u64> {
        let records = self.entitlements.find_group(group).await?;
        let mut revoked = 0;
        for record in records {
            if record.status != EntitlementStatus::Active {
                continue;
            }
            let patch = EntitlementPatch {
                status: Some(EntitlementStatus::Revoked),
                subscription_status: mirror_status.map(|s| Some(s.to_string())),
                ..EntitlementPatch::default()
            };
            match self.entitlements.apply(record.id, patch).await {
                Ok(_) => revoked += 1,
                Err(e) => warn!(error = %e, record = %record.id, "Revocation skipped a record"),
            }
        }
        Ok(revoked)
    }
}

fn checkout_mode(plan: Plan) -> SessionMode {
    match plan {
        Plan::Lifetime => SessionMode::Payment,
        Plan::Monthly => SessionMode::Subscription,
    }
}
