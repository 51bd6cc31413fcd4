//! Plan catalog: pricing and duration policy per plan.

use chrono::{DateTime, Duration, Utc};

use shadowlink_core::config::plans::{PlanEntry, PlansConfig};
use shadowlink_entity::entitlement::Plan;

/// A single plan's resolved policy.
#[derive(Debug, Clone)]
pub struct PlanPolicy {
    /// The plan this policy describes.
    pub plan: Plan,
    /// Customer-facing label.
    pub label: String,
    /// Customer-facing description.
    pub description: String,
    /// Days of access per purchase/period; `None` never self-expires.
    pub duration_days: Option<u32>,
    /// Price in cents.
    pub price_cents: i64,
}

/// Maps plans to their pricing/duration policy.
///
/// Durations here are advisory defaults: they compute `expires_at` at
/// creation time, and the verifier overrides from the billing provider's
/// period boundary when one is available.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    monthly: PlanPolicy,
    lifetime: PlanPolicy,
}

impl PlanCatalog {
    /// Build the catalog from configuration.
    pub fn from_config(config: &PlansConfig) -> Self {
        Self {
            monthly: policy(Plan::Monthly, &config.monthly),
            lifetime: policy(Plan::Lifetime, &config.lifetime),
        }
    }

    /// Resolve a plan's policy.
    pub fn resolve(&self, plan: Plan) -> &PlanPolicy {
        match plan {
            Plan::Monthly => &self.monthly,
            Plan::Lifetime => &self.lifetime,
        }
    }

    /// Default expiry for a plan purchased at `at`.
    pub fn default_expiry(&self, plan: Plan, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.resolve(plan)
            .duration_days
            .map(|days| at + Duration::days(days as i64))
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::from_config(&PlansConfig::default())
    }
}

fn policy(plan: Plan, entry: &PlanEntry) -> PlanPolicy {
    PlanPolicy {
        plan,
        label: entry.label.clone(),
        description: entry.description.clone(),
        duration_days: entry.duration_days,
        price_cents: entry.price_cents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_expiry() {
        let catalog = PlanCatalog::default();
        let now = Utc::now();

        let expiry = catalog.default_expiry(Plan::Monthly, now).unwrap();
        assert_eq!(expiry, now + Duration::days(30));

        assert!(catalog.default_expiry(Plan::Lifetime, now).is_none());
    }

    #[test]
    fn test_resolve_carries_config_prices() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.resolve(Plan::Monthly).price_cents, 4000);
        assert_eq!(catalog.resolve(Plan::Lifetime).price_cents, 12000);
        assert!(catalog.resolve(Plan::Lifetime).duration_days.is_none());
    }
}
