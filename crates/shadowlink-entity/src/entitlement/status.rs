//! Entitlement status enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an entitlement record.
///
/// `Revoked` is sticky against ordinary verification but reversible: the
/// verifier restores a revoked record to `Active` when the underlying
/// subscription turns out to be valid again, and explicit reactivation
/// transitions do the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entitlement_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntitlementStatus {
    /// Created but not yet usable.
    Pending,
    /// Usable, subject to expiry and device binding.
    Active,
    /// Disabled by a lifecycle transition or payment failure.
    Revoked,
}

impl EntitlementStatus {
    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntitlementStatus {
    type Err = shadowlink_core::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            _ => Err(shadowlink_core::AppError::validation(format!(
                "Unknown entitlement status: '{s}'"
            ))),
        }
    }
}
