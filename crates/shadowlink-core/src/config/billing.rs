//! Billing provider integration configuration.

use serde::{Deserialize, Serialize};

/// Billing provider configuration.
///
/// When `enabled` is false, every lifecycle operation that needs the
/// provider fails with a configuration error; read-only verification still
/// works from stored record state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Whether the billing provider integration is configured.
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the provider REST API.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Provider secret API key.
    #[serde(default)]
    pub secret_key: String,
    /// Shared secret for webhook signature verification.
    #[serde(default)]
    pub webhook_secret: String,
    /// Per-request timeout for provider calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Product name prefix used when auto-creating provider products.
    #[serde(default = "default_product_prefix")]
    pub product_prefix: String,
    /// Redirect URL after a successful checkout.
    #[serde(default = "default_success_url")]
    pub checkout_success_url: String,
    /// Redirect URL after an abandoned checkout.
    #[serde(default = "default_cancel_url")]
    pub checkout_cancel_url: String,
    /// Free trial length granted on a lifetime-to-monthly downgrade, in days.
    #[serde(default = "default_downgrade_trial_days")]
    pub downgrade_trial_days: u32,
    /// How recently a subscription must have been created for a webhook with
    /// no matching entitlements to mint a new one (renewals never create).
    #[serde(default = "default_new_subscription_window")]
    pub new_subscription_window_minutes: u32,
    /// Upgrade proration policy.
    #[serde(default)]
    pub proration: ProrationConfig,
}

/// Proration policy for monthly-to-lifetime upgrades.
///
/// The upgrade charge is the lifetime price minus the remaining value of the
/// current monthly period. The exact rule evolved over the product's life,
/// so it stays configurable rather than hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProrationConfig {
    /// When the remaining period value already covers the lifetime price,
    /// flip the plan immediately without a checkout.
    #[serde(default = "default_true")]
    pub free_flip_when_covered: bool,
    /// Smallest charge worth collecting, in cents. Differences at or below
    /// this threshold are treated as covered.
    #[serde(default)]
    pub minimum_charge_cents: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: default_api_base(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            request_timeout_seconds: default_request_timeout(),
            product_prefix: default_product_prefix(),
            checkout_success_url: default_success_url(),
            checkout_cancel_url: default_cancel_url(),
            downgrade_trial_days: default_downgrade_trial_days(),
            new_subscription_window_minutes: default_new_subscription_window(),
            proration: ProrationConfig::default(),
        }
    }
}

impl Default for ProrationConfig {
    fn default() -> Self {
        Self {
            free_flip_when_covered: true,
            minimum_charge_cents: 0,
        }
    }
}

fn default_api_base() -> String {
    "https://api.stripe.com/v1".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_product_prefix() -> String {
    "Shadow Link".to_string()
}

fn default_success_url() -> String {
    "https://shadowlink.app/payment/success?session_id={CHECKOUT_SESSION_ID}".to_string()
}

fn default_cancel_url() -> String {
    "https://shadowlink.app/payment/cancel".to_string()
}

fn default_downgrade_trial_days() -> u32 {
    30
}

fn default_new_subscription_window() -> u32 {
    5
}

fn default_true() -> bool {
    true
}
