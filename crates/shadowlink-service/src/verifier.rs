//! Activation verification: the entitlement state machine.
//!
//! A verification reconciles the stored record against an ordered chain of
//! authoritative sources — direct subscription, owner's subscription,
//! one-time session, stored expiry — and each source either decides the
//! attempt or defers to the next. Partial results from two sources are
//! never mixed into one field. A provider outage mid-chain falls through;
//! it can never grant access by itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use shadowlink_billing::oracle::BillingOracle;
use shadowlink_billing::types::{SessionView, SubscriptionState, SubscriptionView};
use shadowlink_core::error::AppError;
use shadowlink_core::result::AppResult;
use shadowlink_core::types::code::SubmittedCode;
use shadowlink_database::store::{EntitlementStore, OwnerStore};
use shadowlink_entity::entitlement::{Entitlement, EntitlementPatch, EntitlementStatus, Plan};
use shadowlink_entity::verdict::{DenialReason, Entitled, Verdict};

use crate::catalog::PlanCatalog;
use crate::code;

/// Verifies submitted activation codes against record, oracle, and device
/// binding state.
#[derive(Debug)]
pub struct ActivationVerifier {
    entitlements: Arc<dyn EntitlementStore>,
    owners: Arc<dyn OwnerStore>,
    oracle: BillingOracle,
    catalog: PlanCatalog,
}

/// What one reconciliation source concluded.
#[derive(Debug)]
struct Decision {
    outcome: Outcome,
    patch: EntitlementPatch,
    subscription_status: Option<String>,
}

#[derive(Debug)]
enum Outcome {
    Entitled,
    Denied(DenialReason),
}

impl ActivationVerifier {
    /// Create the verifier.
    pub fn new(
        entitlements: Arc<dyn EntitlementStore>,
        owners: Arc<dyn OwnerStore>,
        oracle: BillingOracle,
        catalog: PlanCatalog,
    ) -> Self {
        Self {
            entitlements,
            owners,
            oracle,
            catalog,
        }
    }

    /// Verify a submitted code (or stored digest) for a device.
    ///
    /// Denials come back as verdicts; an `Err` means the record store
    /// itself failed and no judgment was possible.
    pub async fn verify(&self, submitted: &str, device_id: &str) -> AppResult<Verdict> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Ok(Verdict::denied(DenialReason::DeviceRequired));
        }

        let Some(record) = self.lookup(submitted).await? else {
            return Ok(Verdict::denied(DenialReason::NotFound));
        };

        let now = Utc::now();
        // A non-active record is not judged yet: reconciliation may find
        // the backing subscription valid again and resurrect it.
        let was_inactive = record.status != EntitlementStatus::Active;

        let decision = self.reconcile(&record, was_inactive, now).await?;

        let record = if decision.patch.is_empty() {
            record
        } else {
            self.entitlements
                .apply(record.id, decision.patch.clone())
                .await?
        };

        if let Outcome::Denied(reason) = decision.outcome {
            debug!(email = %record.email, %reason, "Verification denied");
            return Ok(Verdict::denied(reason));
        }

        let (bound_device, redeemed_at) = match record.redeemed_device_id.clone() {
            Some(existing) if existing == device_id => {
                (existing, record.redeemed_at.unwrap_or(now))
            }
            Some(_) => {
                debug!(email = %record.email, "Verification denied: bound to another device");
                return Ok(Verdict::denied(DenialReason::DeviceMismatch));
            }
            None => {
                let updated = self
                    .entitlements
                    .bind_device(record.id, device_id, now)
                    .await?;
                match updated.redeemed_device_id.clone() {
                    Some(winner) if winner == device_id => {
                        info!(email = %record.email, device = %device_id, "Device bound on first use");
                        (winner, updated.redeemed_at.unwrap_or(now))
                    }
                    Some(_) => {
                        debug!(email = %record.email, "Lost device-binding race");
                        return Ok(Verdict::denied(DenialReason::DeviceMismatch));
                    }
                    None => return Err(AppError::database("Device binding did not persist")),
                }
            }
        };

        let subscription_status = if record.plan.is_lifetime() {
            "active".to_string()
        } else {
            decision
                .subscription_status
                .or_else(|| record.subscription_status.clone())
                .unwrap_or_else(|| "active".to_string())
        };

        Ok(Verdict::Granted(Entitled {
            plan: record.plan,
            expires_at: record.expires_at,
            device_id: bound_device,
            redeemed_at,
            subscription_status,
        }))
    }

    /// Resolve the submitted credential to a record.
    ///
    /// A plaintext submission whose digest misses falls back to the legacy
    /// plaintext index; a hit there is migrated to digest keying on the
    /// spot.
    async fn lookup(&self, submitted: &str) -> AppResult<Option<Entitlement>> {
        match SubmittedCode::classify(submitted) {
            SubmittedCode::Digest(digest) => self.entitlements.find_by_code_hash(&digest).await,
            SubmittedCode::Plain(plain) => {
                let digest = code::digest(&plain);
                if let Some(record) = self.entitlements.find_by_code_hash(&digest).await? {
                    return Ok(Some(record));
                }
                match self.entitlements.find_by_plain_code(&plain).await? {
                    Some(legacy) => {
                        info!(email = %legacy.email, "Migrating plaintext-keyed entitlement to digest keying");
                        self.entitlements
                            .adopt_code_hash(legacy.id, &digest)
                            .await
                            .map(Some)
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Run the ordered source chain until one decides.
    async fn reconcile(
        &self,
        record: &Entitlement,
        was_inactive: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Decision> {
        if let Some(subscription_ref) = record.subscription_ref.as_deref() {
            match self.oracle.subscription_status(subscription_ref).await {
                Ok(view) => return Ok(self.from_subscription(record, &view, was_inactive)),
                Err(e) => {
                    warn!(error = %e, subscription = %subscription_ref, "Subscription source unavailable, deferring")
                }
            }
        }

        if let Some(customer_ref) = record.customer_ref.as_deref() {
            if let Some(owner) = self.owners.find_by_customer_ref(customer_ref).await? {
                if let Some(subscription_ref) = owner.subscription_ref.as_deref() {
                    match self.oracle.subscription_status(subscription_ref).await {
                        Ok(view) => return Ok(self.from_subscription(record, &view, was_inactive)),
                        Err(e) => {
                            warn!(error = %e, subscription = %subscription_ref, "Owner subscription source unavailable, deferring")
                        }
                    }
                }
            }
        }

        if let Some(session_ref) = record.session_ref.as_deref() {
            match self.oracle.session_status(session_ref).await {
                Ok(session) => return Ok(self.from_session(record, &session, was_inactive, now)),
                Err(e) => {
                    warn!(error = %e, session = %session_ref, "Session source unavailable, deferring")
                }
            }
        }

        Ok(Self::from_stored(record, was_inactive, now))
    }

    /// Judge against live subscription state (the highest-priority source).
    fn from_subscription(
        &self,
        record: &Entitlement,
        view: &SubscriptionView,
        was_inactive: bool,
    ) -> Decision {
        let mut patch = EntitlementPatch::default();

        // The plan can change between purchase and redemption; the
        // subscription's metadata wins over the stored plan.
        let plan = view.plan_hint.unwrap_or(record.plan);
        if plan != record.plan {
            info!(email = %record.email, from = %record.plan, to = %plan, "Correcting plan from subscription metadata");
            patch.plan = Some(plan);
        }

        let expires_at = match plan {
            Plan::Lifetime => None,
            Plan::Monthly => view.current_period_end.or(record.expires_at),
        };
        if expires_at != record.expires_at {
            patch.expires_at = Some(expires_at);
        }

        let status_str = view.state.to_string();
        if record.subscription_status.as_deref() != Some(view.state.as_str()) {
            patch.subscription_status = Some(Some(status_str.clone()));
        }
        if view.current_period_end != record.period_end {
            patch.period_end = Some(view.current_period_end);
        }

        if !view.service_enabled {
            return Decision {
                outcome: Outcome::Denied(DenialReason::ServiceDisabled),
                patch,
                subscription_status: Some(status_str),
            };
        }

        if view.state.grants_access() {
            if was_inactive {
                info!(email = %record.email, "Resurrecting revoked entitlement: subscription is valid again");
                patch.status = Some(EntitlementStatus::Active);
            }
            Decision {
                outcome: Outcome::Entitled,
                patch,
                subscription_status: Some(status_str),
            }
        } else {
            let reason = if view.state == SubscriptionState::Canceled && was_inactive {
                DenialReason::Expired
            } else {
                DenialReason::SubscriptionInactive
            };
            Decision {
                outcome: Outcome::Denied(reason),
                patch,
                subscription_status: Some(status_str),
            }
        }
    }

    /// Judge against the legacy one-time session (no subscription).
    fn from_session(
        &self,
        record: &Entitlement,
        session: &SessionView,
        was_inactive: bool,
        now: DateTime<Utc>,
    ) -> Decision {
        let mut patch = EntitlementPatch::default();

        if !session.payment_complete {
            return Decision {
                outcome: Outcome::Denied(DenialReason::SubscriptionInactive),
                patch,
                subscription_status: None,
            };
        }

        let expires_at = match record.plan {
            Plan::Lifetime => None,
            Plan::Monthly => record.expires_at.or_else(|| {
                session
                    .created_at
                    .and_then(|created| self.catalog.default_expiry(Plan::Monthly, created))
            }),
        };
        if expires_at != record.expires_at {
            patch.expires_at = Some(expires_at);
        }

        // A one-time session carries no resurrection signal.
        if was_inactive {
            return Decision {
                outcome: Outcome::Denied(DenialReason::Revoked),
                patch,
                subscription_status: None,
            };
        }

        if matches!(expires_at, Some(expires) if expires <= now) {
            return Decision {
                outcome: Outcome::Denied(DenialReason::Expired),
                patch,
                subscription_status: None,
            };
        }

        Decision {
            outcome: Outcome::Entitled,
            patch,
            subscription_status: None,
        }
    }

    /// Judge from stored state alone (every external source unavailable).
    fn from_stored(record: &Entitlement, was_inactive: bool, now: DateTime<Utc>) -> Decision {
        let outcome = if was_inactive {
            Outcome::Denied(DenialReason::Revoked)
        } else if record.is_expired(now) {
            Outcome::Denied(DenialReason::Expired)
        } else {
            Outcome::Entitled
        };
        Decision {
            outcome,
            patch: EntitlementPatch::default(),
            subscription_status: None,
        }
    }
}
