//! Narrow views over billing-provider objects.
//!
//! Each view declares exactly the fields the licensing core reads, so the
//! core stays decoupled from the provider's full schema. Parsing is
//! tolerant: optional fields degrade to `None`/defaults, only the object id
//! is mandatory.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use shadowlink_core::error::AppError;
use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::OwnerId;
use shadowlink_entity::entitlement::Plan;

/// Metadata keys this system writes to (and reads back from) provider
/// objects. The provider treats metadata as opaque strings.
pub mod meta {
    /// Plan identifier attached to sessions, subscriptions, and prices.
    pub const PLAN: &str = "plan";
    /// Owner id attached to owner-initiated checkouts.
    pub const OWNER_ID: &str = "owner_id";
    /// Purchaser email.
    pub const EMAIL: &str = "email";
    /// Checkout intent: `purchase`, `upgrade`, or `downgrade`.
    pub const ACTION: &str = "action";
    /// Set to `lifetime` on subscriptions created by a downgrade.
    pub const DOWNGRADED_FROM: &str = "downgraded_from";
    /// Out-of-band kill switch; absent means enabled, literal `false` means
    /// disabled.
    pub const SERVICE_ENABLED: &str = "service_enabled";
}

/// Provider subscription status, narrowed to the values this core branches
/// on. Anything else parses to `Unknown` and denies access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Paid and current.
    Active,
    /// In a free trial period.
    Trialing,
    /// Payment late but within the grace window.
    PastDue,
    /// Canceled.
    Canceled,
    /// Payment failed past the grace window.
    Unpaid,
    /// Collection paused.
    Paused,
    /// Any status this core does not recognize.
    Unknown,
}

impl SubscriptionState {
    /// Whether this status still grants access.
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing | Self::PastDue)
    }

    /// Parse a provider status string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "unpaid" => Self::Unpaid,
            "paused" => Self::Paused,
            _ => Self::Unknown,
        }
    }

    /// Return the status as its provider wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Narrow view of a provider subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionView {
    /// Provider subscription reference.
    pub id: String,
    /// Owning customer reference, when present.
    pub customer_ref: Option<String>,
    /// Current status.
    pub state: SubscriptionState,
    /// Current period start.
    pub current_period_start: Option<DateTime<Utc>>,
    /// Current period end.
    pub current_period_end: Option<DateTime<Utc>>,
    /// Whether a deferred cancellation is scheduled.
    pub cancel_at_period_end: bool,
    /// Plan hint from price/subscription metadata.
    pub plan_hint: Option<Plan>,
    /// Out-of-band service kill switch (true = enabled).
    pub service_enabled: bool,
    /// When the subscription was created provider-side.
    pub created_at: Option<DateTime<Utc>>,
    /// Whether this subscription was created by a lifetime downgrade.
    pub downgraded_from_lifetime: bool,
}

impl SubscriptionView {
    /// Narrow a provider-native subscription object.
    pub fn from_provider_json(object: &Value) -> AppResult<Self> {
        let id = required_str(object, "id")?;
        let metadata = &object["metadata"];

        let plan_hint = object["items"]["data"][0]["price"]["metadata"][meta::PLAN]
            .as_str()
            .or_else(|| metadata[meta::PLAN].as_str())
            .and_then(|raw| Plan::from_str(raw).ok());

        Ok(Self {
            id,
            customer_ref: object["customer"].as_str().map(str::to_string),
            state: object["status"]
                .as_str()
                .map(SubscriptionState::parse)
                .unwrap_or(SubscriptionState::Unknown),
            current_period_start: unix_ts(&object["current_period_start"]),
            current_period_end: unix_ts(&object["current_period_end"]),
            cancel_at_period_end: object["cancel_at_period_end"].as_bool().unwrap_or(false),
            plan_hint,
            service_enabled: service_enabled_from(metadata),
            created_at: unix_ts(&object["created"]),
            downgraded_from_lifetime: metadata[meta::DOWNGRADED_FROM].as_str()
                == Some(Plan::Lifetime.as_str()),
        })
    }

    /// Whether the subscription was created within `window` of `now`.
    ///
    /// Used to distinguish a brand-new subscription (which may mint an
    /// entitlement) from a renewal (which never does).
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.created_at {
            Some(created) => now.signed_duration_since(created) <= window,
            None => false,
        }
    }
}

/// Checkout session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// One-time payment.
    Payment,
    /// Recurring subscription.
    Subscription,
    /// Any mode this core does not recognize.
    Unknown,
}

/// Intent recorded on an owner-initiated checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutAction {
    /// Plain purchase.
    Purchase,
    /// Monthly-to-lifetime upgrade (one-off difference charge).
    Upgrade,
    /// Lifetime-to-monthly downgrade (free first period).
    Downgrade,
}

impl CheckoutAction {
    /// Wire string written into checkout metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
        }
    }

    /// Parse a metadata action value.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "purchase" => Some(Self::Purchase),
            "upgrade" => Some(Self::Upgrade),
            "downgrade" => Some(Self::Downgrade),
            _ => None,
        }
    }
}

/// Narrow view of a provider checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    /// Provider session reference.
    pub id: String,
    /// Session mode.
    pub mode: SessionMode,
    /// Whether payment has completed.
    pub payment_complete: bool,
    /// Customer reference, when present.
    pub customer_ref: Option<String>,
    /// Subscription created by this session, when any.
    pub subscription_ref: Option<String>,
    /// Purchaser email, from customer details or metadata.
    pub email: Option<String>,
    /// Plan hint from metadata.
    pub plan_hint: Option<Plan>,
    /// Owner that initiated the checkout, when it was owner-initiated.
    pub owner_hint: Option<OwnerId>,
    /// Checkout intent, when recorded.
    pub action_hint: Option<CheckoutAction>,
    /// When the session was created provider-side.
    pub created_at: Option<DateTime<Utc>>,
}

impl SessionView {
    /// Narrow a provider-native checkout session object.
    pub fn from_provider_json(object: &Value) -> AppResult<Self> {
        let id = required_str(object, "id")?;
        let metadata = &object["metadata"];

        let email = object["customer_details"]["email"]
            .as_str()
            .or_else(|| object["customer_email"].as_str())
            .or_else(|| metadata[meta::EMAIL].as_str())
            .map(|e| e.trim().to_lowercase());

        Ok(Self {
            id,
            mode: match object["mode"].as_str() {
                Some("payment") => SessionMode::Payment,
                Some("subscription") => SessionMode::Subscription,
                _ => SessionMode::Unknown,
            },
            payment_complete: object["payment_status"].as_str() == Some("paid"),
            customer_ref: object["customer"].as_str().map(str::to_string),
            subscription_ref: object["subscription"].as_str().map(str::to_string),
            email,
            plan_hint: metadata[meta::PLAN]
                .as_str()
                .and_then(|raw| Plan::from_str(raw).ok()),
            owner_hint: metadata[meta::OWNER_ID]
                .as_str()
                .and_then(|raw| OwnerId::from_str(raw).ok()),
            action_hint: metadata[meta::ACTION].as_str().and_then(CheckoutAction::parse),
            created_at: unix_ts(&object["created"]),
        })
    }
}

/// Narrow view of a provider customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerView {
    /// Provider customer reference.
    pub id: String,
    /// Customer email, when present.
    pub email: Option<String>,
    /// Out-of-band service kill switch (true = enabled).
    pub service_enabled: bool,
}

impl CustomerView {
    /// Narrow a provider-native customer object.
    pub fn from_provider_json(object: &Value) -> AppResult<Self> {
        Ok(Self {
            id: required_str(object, "id")?,
            email: object["email"].as_str().map(str::to_string),
            service_enabled: service_enabled_from(&object["metadata"]),
        })
    }
}

/// What to sell when ensuring a provider price exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSpec {
    /// The plan being priced.
    pub plan: Plan,
    /// Provider-side product name.
    pub product_name: String,
    /// Provider-side product description.
    pub description: String,
    /// Price in cents.
    pub amount_cents: i64,
    /// Monthly recurring price (vs one-time).
    pub recurring_monthly: bool,
}

/// A checkout to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Billing customer on whose behalf the checkout runs.
    pub customer_ref: String,
    /// Payment or subscription mode.
    pub mode: SessionMode,
    /// What is being bought.
    pub line: CheckoutLine,
    /// Plan recorded in metadata.
    pub plan: Plan,
    /// Purchaser email recorded in metadata.
    pub email: String,
    /// Initiating owner recorded in metadata.
    pub owner: OwnerId,
    /// Checkout intent recorded in metadata.
    pub action: Option<CheckoutAction>,
    /// Mark the created subscription as a lifetime downgrade.
    pub downgraded_from_lifetime: bool,
    /// Trial days for subscription mode (free first period on downgrade).
    pub trial_days: Option<u32>,
    /// Redirect on success.
    pub success_url: String,
    /// Redirect on abandonment.
    pub cancel_url: String,
}

/// The purchasable line of a checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CheckoutLine {
    /// An existing provider price.
    Price(String),
    /// An ad-hoc one-off amount (used for upgrade difference charges).
    Amount {
        /// Display name.
        name: String,
        /// Display description.
        description: String,
        /// Amount in cents.
        amount_cents: i64,
    },
}

/// A started checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutView {
    /// Provider session reference.
    pub session_ref: String,
    /// Hosted checkout URL to send the customer to.
    pub url: Option<String>,
}

fn required_str(object: &Value, key: &str) -> AppResult<String> {
    object[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::validation(format!("Provider object missing '{key}'")))
}

fn unix_ts(value: &Value) -> Option<DateTime<Utc>> {
    value.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn service_enabled_from(metadata: &Value) -> bool {
    metadata[meta::SERVICE_ENABLED].as_str() != Some("false")
}
