//! Verification verdicts.
//!
//! "Not entitled" is an expected, common outcome, so denials are values,
//! never errors. Every denial reason maps to a distinct, stable wire code
//! so client software can branch on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entitlement::plan::Plan;

/// Result of a verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Verdict {
    /// The entitlement is valid for the submitted device.
    Granted(Entitled),
    /// The entitlement is missing or not currently valid.
    Denied {
        /// Stable, client-branchable reason code.
        reason: DenialReason,
    },
}

impl Verdict {
    /// Shorthand for a denial.
    pub fn denied(reason: DenialReason) -> Self {
        Self::Denied { reason }
    }

    /// Whether the verdict grants access.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    /// The denial reason, when denied.
    pub fn reason(&self) -> Option<DenialReason> {
        match self {
            Self::Granted(_) => None,
            Self::Denied { reason } => Some(*reason),
        }
    }
}

/// The granted side of a verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitled {
    /// Effective plan after reconciliation.
    pub plan: Plan,
    /// Effective expiry after reconciliation; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Device the entitlement is bound to.
    pub device_id: String,
    /// When the entitlement was first redeemed.
    pub redeemed_at: DateTime<Utc>,
    /// Normalized subscription status; a lifetime plan always reports
    /// `"active"` regardless of stale subscription bookkeeping.
    pub subscription_status: String,
}

/// Why a verification attempt was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// No record matches the submitted code.
    NotFound,
    /// The record exists but has been revoked.
    Revoked,
    /// The backing subscription is not in a valid status.
    SubscriptionInactive,
    /// The out-of-band service kill switch is off.
    ServiceDisabled,
    /// The entitlement's period has elapsed.
    Expired,
    /// The entitlement is permanently bound to a different device.
    DeviceMismatch,
    /// The request did not include a device identifier.
    DeviceRequired,
}

impl DenialReason {
    /// Stable wire code for this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Revoked => "revoked",
            Self::SubscriptionInactive => "subscription_inactive",
            Self::ServiceDisabled => "service_disabled",
            Self::Expired => "expired",
            Self::DeviceMismatch => "device_mismatch",
            Self::DeviceRequired => "device_required",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
