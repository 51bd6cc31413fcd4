//! Owner entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use shadowlink_core::types::id::OwnerId;

use crate::entitlement::plan::Plan;

/// An account that owns entitlements and at most one billing relationship.
///
/// Subscription fields mirror the billing provider and are refreshed on
/// webhook delivery and lifecycle transitions; they are a cache, not the
/// source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Owner {
    /// Unique owner identifier.
    pub id: OwnerId,
    /// Normalized (lowercase, trimmed) email; unique.
    pub email: String,
    /// Billing-provider customer reference.
    pub customer_ref: Option<String>,
    /// Billing-provider subscription reference.
    pub subscription_ref: Option<String>,
    /// Mirrored provider subscription status.
    pub subscription_status: Option<String>,
    /// Current plan, when any.
    pub plan: Option<Plan>,
    /// Mirrored current-period end.
    pub current_period_end: Option<DateTime<Utc>>,
    /// When the owner was created.
    pub created_at: DateTime<Utc>,
    /// When the owner was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Owner {
    /// Whether the owner currently holds a provider-managed subscription.
    pub fn has_subscription(&self) -> bool {
        self.subscription_ref.is_some()
    }

    /// Whether the owner holds the lifetime plan.
    pub fn is_lifetime(&self) -> bool {
        self.plan == Some(Plan::Lifetime)
    }
}

/// Targeted field changes applied to an existing owner.
///
/// Same convention as [`crate::entitlement::EntitlementPatch`]: outer
/// `Option` = leave unchanged, inner `Option` = set to null.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnerPatch {
    /// New customer reference (set or clear).
    pub customer_ref: Option<Option<String>>,
    /// New subscription reference (set or clear).
    pub subscription_ref: Option<Option<String>>,
    /// New mirrored subscription status (set or clear).
    pub subscription_status: Option<Option<String>>,
    /// New plan (set or clear).
    pub plan: Option<Option<Plan>>,
    /// New mirrored period end (set or clear).
    pub current_period_end: Option<Option<DateTime<Utc>>>,
}

impl OwnerPatch {
    /// Whether this patch changes anything.
    pub fn is_empty(&self) -> bool {
        self.customer_ref.is_none()
            && self.subscription_ref.is_none()
            && self.subscription_status.is_none()
            && self.plan.is_none()
            && self.current_period_end.is_none()
    }
}
