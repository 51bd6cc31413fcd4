//! Entitlement record entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use shadowlink_core::types::id::EntitlementId;

use super::plan::Plan;
use super::status::EntitlementStatus;

/// A persisted activation entitlement.
///
/// The plaintext code is never stored for lookup once a digest exists;
/// `plain_code` survives only on legacy rows until the verifier migrates
/// them in place on first encounter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Entitlement {
    /// Unique record identifier.
    pub id: EntitlementId,
    /// Normalized (lowercase, trimmed) owner identity.
    pub email: String,
    /// Purchased plan.
    pub plan: Plan,
    /// Hex SHA-256 digest of the normalized activation code; unique when
    /// present. `None` only on legacy rows that predate hashed storage.
    pub code_hash: Option<String>,
    /// Legacy plaintext code, retained only until hash migration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plain_code: Option<String>,
    /// Lifecycle status.
    pub status: EntitlementStatus,
    /// Self-expiry timestamp; `None` = does not expire by itself.
    pub expires_at: Option<DateTime<Utc>>,
    /// Originating payment event (checkout session, or the subscription
    /// itself for records minted from a bare subscription event); the
    /// creation idempotency key.
    pub session_ref: Option<String>,
    /// Billing-provider customer reference.
    pub customer_ref: Option<String>,
    /// Billing-provider subscription reference.
    pub subscription_ref: Option<String>,
    /// Last-observed provider subscription status (cache, not authoritative).
    pub subscription_status: Option<String>,
    /// Last-observed recurring-period end (cache).
    pub period_end: Option<DateTime<Utc>>,
    /// Device this entitlement was first redeemed on; immutable once set.
    pub redeemed_device_id: Option<String>,
    /// When the first redemption happened.
    pub redeemed_at: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Entitlement {
    /// Whether the stored expiry has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires) if expires <= now)
    }

    /// Whether the record is usable before reconciliation and expiry checks.
    pub fn is_active(&self) -> bool {
        self.status == EntitlementStatus::Active
    }

    /// Whether this record is bound to the given device.
    pub fn is_bound_to(&self, device_id: &str) -> bool {
        self.redeemed_device_id.as_deref() == Some(device_id)
    }
}

/// Data required to create a new entitlement record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntitlement {
    /// Normalized owner identity.
    pub email: String,
    /// Purchased plan.
    pub plan: Plan,
    /// Digest of the generated activation code.
    pub code_hash: String,
    /// Plaintext code for legacy-data imports only; normally `None`.
    pub plain_code: Option<String>,
    /// Initial status.
    pub status: EntitlementStatus,
    /// Initial expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Originating payment event, when any; the idempotency key.
    pub session_ref: Option<String>,
    /// Billing customer reference, when any.
    pub customer_ref: Option<String>,
    /// Billing subscription reference, when any.
    pub subscription_ref: Option<String>,
    /// Mirrored provider subscription status, when known.
    pub subscription_status: Option<String>,
    /// Mirrored recurring-period end, when known.
    pub period_end: Option<DateTime<Utc>>,
}

/// Targeted field changes applied to an existing record.
///
/// Every mutation goes through a patch so concurrent writers touching the
/// same record only contend on the fields they actually change. The outer
/// `Option` means "leave unchanged"; the inner `Option` (where present)
/// means "set to null".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitlementPatch {
    /// New plan.
    pub plan: Option<Plan>,
    /// New status.
    pub status: Option<EntitlementStatus>,
    /// New expiry (set or clear).
    pub expires_at: Option<Option<DateTime<Utc>>>,
    /// New subscription reference (set or clear).
    pub subscription_ref: Option<Option<String>>,
    /// New mirrored subscription status (set or clear).
    pub subscription_status: Option<Option<String>>,
    /// New mirrored period end (set or clear).
    pub period_end: Option<Option<DateTime<Utc>>>,
}

impl EntitlementPatch {
    /// Whether this patch changes anything.
    pub fn is_empty(&self) -> bool {
        self.plan.is_none()
            && self.status.is_none()
            && self.expires_at.is_none()
            && self.subscription_ref.is_none()
            && self.subscription_status.is_none()
            && self.period_end.is_none()
    }
}
