//! Entitlement group: the well-defined set a cascade operates over.

use serde::{Deserialize, Serialize};

use crate::owner::Owner;

/// The billing identity that groups an owner's entitlement records.
///
/// A record belongs to the group when its subscription reference matches,
/// or when its customer reference matches together with the owner's email.
/// Lifecycle cascades (plan changes, revocation, reactivation, deletion)
/// operate over exactly this set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingGroup {
    /// Provider subscription reference, when the owner has one.
    pub subscription_ref: Option<String>,
    /// Provider customer reference, when the owner has one.
    pub customer_ref: Option<String>,
    /// Normalized owner email.
    pub email: String,
}

impl BillingGroup {
    /// Build the group key for an owner.
    pub fn for_owner(owner: &Owner) -> Self {
        Self {
            subscription_ref: owner.subscription_ref.clone(),
            customer_ref: owner.customer_ref.clone(),
            email: owner.email.clone(),
        }
    }

    /// Build a group keyed by subscription reference alone.
    pub fn for_subscription(subscription_ref: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            subscription_ref: Some(subscription_ref.into()),
            customer_ref: None,
            email: email.into(),
        }
    }
}
