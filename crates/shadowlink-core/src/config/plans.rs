//! Plan catalog configuration.

use serde::{Deserialize, Serialize};

/// Pricing and duration policy for the two offered plans.
///
/// Durations are advisory: they compute the default expiry at creation
/// time, and the verifier later overrides the expiry from authoritative
/// billing-provider data when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlansConfig {
    /// The recurring monthly plan.
    #[serde(default = "default_monthly")]
    pub monthly: PlanEntry,
    /// The one-time lifetime plan.
    #[serde(default = "default_lifetime")]
    pub lifetime: PlanEntry,
}

/// A single plan's policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Customer-facing plan label.
    pub label: String,
    /// Customer-facing plan description.
    #[serde(default)]
    pub description: String,
    /// Days of access granted per purchase/period; `None` never self-expires.
    pub duration_days: Option<u32>,
    /// Price in cents.
    pub price_cents: i64,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            monthly: default_monthly(),
            lifetime: default_lifetime(),
        }
    }
}

fn default_monthly() -> PlanEntry {
    PlanEntry {
        label: "One-Month Access".to_string(),
        description: "Full feature access for 30 days".to_string(),
        duration_days: Some(30),
        price_cents: 4000,
    }
}

fn default_lifetime() -> PlanEntry {
    PlanEntry {
        label: "Lifetime Access".to_string(),
        description: "One-time purchase, permanent access".to_string(),
        duration_days: None,
        price_cents: 12000,
    }
}
