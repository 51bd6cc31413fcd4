//! HTTP billing provider client.
//!
//! Talks to a Stripe-style REST API: bearer-authenticated, form-encoded
//! requests, JSON responses. Only the narrow field set this system reads is
//! ever extracted from the responses.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use shadowlink_core::config::billing::BillingConfig;
use shadowlink_core::error::{AppError, ErrorKind};
use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::OwnerId;

use crate::provider::BillingProvider;
use crate::types::{
    meta, CheckoutLine, CheckoutRequest, CheckoutView, CustomerView, PricingSpec, SessionMode,
    SessionView, SubscriptionView,
};

/// Billing provider backed by the provider's REST API.
#[derive(Debug)]
pub struct HttpBillingProvider {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl HttpBillingProvider {
    /// Build a client from configuration.
    pub fn new(config: &BillingConfig) -> AppResult<Self> {
        if config.secret_key.is_empty() {
            return Err(AppError::configuration(
                "Billing provider secret key is not configured",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Configuration,
                    "Failed to build billing HTTP client",
                    e,
                )
            })?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> AppResult<Value> {
        let url = format!("{}/{}", self.api_base, path);
        debug!(%url, "Billing GET");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::ExternalService, "Billing request failed", e)
            })?;
        Self::into_json(response).await
    }

    async fn post(&self, path: &str, params: &[(String, String)]) -> AppResult<Value> {
        let url = format!("{}/{}", self.api_base, path);
        debug!(%url, "Billing POST");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::ExternalService, "Billing request failed", e)
            })?;
        Self::into_json(response).await
    }

    async fn into_json(response: reqwest::Response) -> AppResult<Value> {
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AppError::with_source(ErrorKind::ExternalService, "Failed to read billing reply", e)
        })?;
        if !status.is_success() {
            return Err(AppError::billing(format!(
                "Billing provider returned {status}: {body}"
            )));
        }
        serde_json::from_str(&body).map_err(AppError::from)
    }

    fn kv(key: &str, value: impl Into<String>) -> (String, String) {
        (key.to_string(), value.into())
    }
}

#[async_trait]
impl BillingProvider for HttpBillingProvider {
    async fn get_subscription(&self, subscription_ref: &str) -> AppResult<SubscriptionView> {
        let object = self
            .get(&format!("subscriptions/{subscription_ref}"), &[])
            .await?;
        SubscriptionView::from_provider_json(&object)
    }

    async fn cancel_subscription(&self, subscription_ref: &str) -> AppResult<SubscriptionView> {
        let object = self
            .post(&format!("subscriptions/{subscription_ref}/cancel"), &[])
            .await?;
        SubscriptionView::from_provider_json(&object)
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_ref: &str,
        cancel: bool,
    ) -> AppResult<SubscriptionView> {
        let params = [Self::kv("cancel_at_period_end", cancel.to_string())];
        let object = self
            .post(&format!("subscriptions/{subscription_ref}"), &params)
            .await?;
        SubscriptionView::from_provider_json(&object)
    }

    async fn set_subscription_metadata(
        &self,
        subscription_ref: &str,
        entries: Vec<(String, String)>,
    ) -> AppResult<()> {
        let params: Vec<(String, String)> = entries
            .into_iter()
            .map(|(key, value)| (format!("metadata[{key}]"), value))
            .collect();
        self.post(&format!("subscriptions/{subscription_ref}"), &params)
            .await?;
        Ok(())
    }

    async fn end_trial_now(&self, subscription_ref: &str) -> AppResult<SubscriptionView> {
        let params = [Self::kv("trial_end", "now")];
        let object = self
            .post(&format!("subscriptions/{subscription_ref}"), &params)
            .await?;
        SubscriptionView::from_provider_json(&object)
    }

    async fn get_session(&self, session_ref: &str) -> AppResult<SessionView> {
        let object = self
            .get(&format!("checkout/sessions/{session_ref}"), &[])
            .await?;
        SessionView::from_provider_json(&object)
    }

    async fn get_customer(&self, customer_ref: &str) -> AppResult<CustomerView> {
        let object = self.get(&format!("customers/{customer_ref}"), &[]).await?;
        CustomerView::from_provider_json(&object)
    }

    async fn create_customer(&self, email: &str, owner: OwnerId) -> AppResult<CustomerView> {
        let params = [
            Self::kv("email", email),
            Self::kv(&format!("metadata[{}]", meta::OWNER_ID), owner.to_string()),
        ];
        let object = self.post("customers", &params).await?;
        CustomerView::from_provider_json(&object)
    }

    async fn set_customer_metadata(
        &self,
        customer_ref: &str,
        entries: Vec<(String, String)>,
    ) -> AppResult<()> {
        let params: Vec<(String, String)> = entries
            .into_iter()
            .map(|(key, value)| (format!("metadata[{key}]"), value))
            .collect();
        self.post(&format!("customers/{customer_ref}"), &params)
            .await?;
        Ok(())
    }

    async fn ensure_price(&self, spec: &PricingSpec) -> AppResult<String> {
        // Find an existing product by name, create one if missing.
        let products = self
            .get("products", &[("active", "true".into()), ("limit", "100".into())])
            .await?;
        let product_id = products["data"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|p| p["name"].as_str() == Some(spec.product_name.as_str()))
            .and_then(|p| p["id"].as_str().map(str::to_string));

        let product_id = match product_id {
            Some(id) => id,
            None => {
                let params = [
                    Self::kv("name", spec.product_name.clone()),
                    Self::kv("description", spec.description.clone()),
                    Self::kv(
                        &format!("metadata[{}]", meta::PLAN),
                        spec.plan.to_string(),
                    ),
                ];
                let object = self.post("products", &params).await?;
                object["id"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::billing("Product creation returned no id"))?
            }
        };

        // Same for the price: match on amount, currency, and cadence.
        let prices = self
            .get(
                "prices",
                &[
                    ("product", product_id.clone()),
                    ("active", "true".into()),
                    ("limit", "100".into()),
                ],
            )
            .await?;
        let wanted_type = if spec.recurring_monthly {
            "recurring"
        } else {
            "one_time"
        };
        let existing = prices["data"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|p| {
                p["unit_amount"].as_i64() == Some(spec.amount_cents)
                    && p["currency"].as_str() == Some("usd")
                    && p["type"].as_str() == Some(wanted_type)
            })
            .and_then(|p| p["id"].as_str().map(str::to_string));

        if let Some(price_id) = existing {
            return Ok(price_id);
        }

        let mut params = vec![
            Self::kv("product", product_id),
            Self::kv("unit_amount", spec.amount_cents.to_string()),
            Self::kv("currency", "usd"),
            Self::kv(&format!("metadata[{}]", meta::PLAN), spec.plan.to_string()),
        ];
        if spec.recurring_monthly {
            params.push(Self::kv("recurring[interval]", "month"));
        }
        let object = self.post("prices", &params).await?;
        object["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::billing("Price creation returned no id"))
    }

    async fn create_checkout(&self, request: CheckoutRequest) -> AppResult<CheckoutView> {
        let mut params = vec![
            Self::kv(
                "mode",
                match request.mode {
                    SessionMode::Payment => "payment",
                    SessionMode::Subscription => "subscription",
                    SessionMode::Unknown => {
                        return Err(AppError::validation("Checkout mode must be known"))
                    }
                },
            ),
            Self::kv("customer", request.customer_ref.clone()),
            Self::kv("payment_method_types[0]", "card"),
            Self::kv("success_url", request.success_url.clone()),
            Self::kv("cancel_url", request.cancel_url.clone()),
            Self::kv("line_items[0][quantity]", "1"),
            Self::kv(
                &format!("metadata[{}]", meta::PLAN),
                request.plan.to_string(),
            ),
            Self::kv(
                &format!("metadata[{}]", meta::OWNER_ID),
                request.owner.to_string(),
            ),
            Self::kv(&format!("metadata[{}]", meta::EMAIL), request.email.clone()),
        ];
        if let Some(action) = request.action {
            params.push(Self::kv(
                &format!("metadata[{}]", meta::ACTION),
                action.as_str(),
            ));
        }

        match &request.line {
            CheckoutLine::Price(price_ref) => {
                params.push(Self::kv("line_items[0][price]", price_ref.clone()));
            }
            CheckoutLine::Amount {
                name,
                description,
                amount_cents,
            } => {
                params.push(Self::kv("line_items[0][price_data][currency]", "usd"));
                params.push(Self::kv(
                    "line_items[0][price_data][product_data][name]",
                    name.clone(),
                ));
                params.push(Self::kv(
                    "line_items[0][price_data][product_data][description]",
                    description.clone(),
                ));
                params.push(Self::kv(
                    "line_items[0][price_data][unit_amount]",
                    amount_cents.to_string(),
                ));
            }
        }

        if request.mode == SessionMode::Subscription {
            params.push(Self::kv(
                &format!("subscription_data[metadata][{}]", meta::PLAN),
                request.plan.to_string(),
            ));
            params.push(Self::kv(
                &format!("subscription_data[metadata][{}]", meta::OWNER_ID),
                request.owner.to_string(),
            ));
            if request.downgraded_from_lifetime {
                params.push(Self::kv(
                    &format!("subscription_data[metadata][{}]", meta::DOWNGRADED_FROM),
                    "lifetime",
                ));
            }
            if let Some(days) = request.trial_days {
                params.push(Self::kv(
                    "subscription_data[trial_period_days]",
                    days.to_string(),
                ));
            }
        }

        let object = self.post("checkout/sessions", &params).await?;
        Ok(CheckoutView {
            session_ref: object["id"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| AppError::billing("Checkout creation returned no id"))?,
            url: object["url"].as_str().map(str::to_string),
        })
    }
}
