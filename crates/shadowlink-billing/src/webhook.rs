//! Webhook signature verification and event narrowing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use shadowlink_core::error::AppError;
use shadowlink_core::result::AppResult;

use crate::types::{SessionView, SubscriptionView};

type HmacSha256 = Hmac<Sha256>;

/// Verifies `t=<unix>,v1=<hex hmac>` webhook signature headers.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: String,
    /// Maximum accepted age of the signed timestamp, in seconds.
    tolerance_seconds: i64,
}

impl SignatureVerifier {
    /// Create a verifier with the default 5-minute timestamp tolerance.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_seconds: 300,
        }
    }

    /// Override the timestamp tolerance.
    pub fn with_tolerance(mut self, seconds: i64) -> Self {
        self.tolerance_seconds = seconds;
        self
    }

    /// Check a raw payload against its signature header.
    ///
    /// Returns `Ok(false)` for wrong signatures, stale timestamps, and
    /// malformed headers; errors are reserved for a missing secret.
    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        if self.secret.is_empty() {
            return Err(AppError::configuration("Webhook secret is not configured"));
        }

        let mut timestamp: Option<i64> = None;
        let mut signature: Option<Vec<u8>> = None;
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => signature = hex::decode(value).ok(),
                _ => {}
            }
        }
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Ok(false);
        };

        if (now.timestamp() - timestamp).abs() > self.tolerance_seconds {
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AppError::internal(format!("HMAC key setup failed: {e}")))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        Ok(mac.verify_slice(&signature).is_ok())
    }
}

/// A provider webhook event, narrowed to what this system reacts to.
#[derive(Debug, Clone)]
pub enum BillingEvent {
    /// A checkout session finished.
    CheckoutCompleted(SessionView),
    /// A subscription was created or updated.
    SubscriptionChanged(SubscriptionView),
    /// A subscription was deleted provider-side.
    SubscriptionDeleted(SubscriptionView),
    /// A recurring invoice was paid (renewal).
    InvoicePaid {
        /// The renewed subscription.
        subscription_ref: String,
    },
    /// A recurring invoice failed to collect.
    InvoicePaymentFailed {
        /// The affected subscription.
        subscription_ref: String,
    },
    /// An asynchronous session payment failed after checkout.
    SessionPaymentFailed {
        /// The affected session, when the event carries one.
        session_ref: Option<String>,
    },
    /// Any event type this system does not handle.
    Ignored {
        /// The provider's event type string.
        event_type: String,
    },
}

/// Narrow a raw provider event into a [`BillingEvent`].
///
/// Unknown event types are never errors; replays and irrelevant events are
/// part of normal webhook traffic.
pub fn parse_event(event: &Value) -> AppResult<BillingEvent> {
    let event_type = event["type"].as_str().unwrap_or_default().to_string();
    let object = &event["data"]["object"];

    let parsed = match event_type.as_str() {
        "checkout.session.completed" => {
            BillingEvent::CheckoutCompleted(SessionView::from_provider_json(object)?)
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            BillingEvent::SubscriptionChanged(SubscriptionView::from_provider_json(object)?)
        }
        "customer.subscription.deleted" => {
            BillingEvent::SubscriptionDeleted(SubscriptionView::from_provider_json(object)?)
        }
        "invoice.payment_succeeded" => match object["subscription"].as_str() {
            Some(subscription_ref) => BillingEvent::InvoicePaid {
                subscription_ref: subscription_ref.to_string(),
            },
            None => BillingEvent::Ignored { event_type },
        },
        "invoice.payment_failed" => match object["subscription"].as_str() {
            Some(subscription_ref) => BillingEvent::InvoicePaymentFailed {
                subscription_ref: subscription_ref.to_string(),
            },
            None => BillingEvent::Ignored { event_type },
        },
        "checkout.session.async_payment_failed" => BillingEvent::SessionPaymentFailed {
            session_ref: object["id"].as_str().map(str::to_string),
        },
        "payment_intent.payment_failed" => BillingEvent::SessionPaymentFailed {
            session_ref: object["metadata"]["session_ref"].as_str().map(str::to_string),
        },
        _ => BillingEvent::Ignored { event_type },
    };

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature() {
        let verifier = SignatureVerifier::new("whsec_test");
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = Utc::now();
        let header = sign(payload, "whsec_test", now.timestamp());
        assert!(verifier.verify(payload, &header, now).unwrap());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = SignatureVerifier::new("whsec_test");
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = Utc::now();
        let header = sign(payload, "whsec_other", now.timestamp());
        assert!(!verifier.verify(payload, &header, now).unwrap());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let verifier = SignatureVerifier::new("whsec_test");
        let payload = b"{}";
        let now = Utc::now();
        let header = sign(payload, "whsec_test", now.timestamp() - 600);
        assert!(!verifier.verify(payload, &header, now).unwrap());
    }

    #[test]
    fn test_malformed_header_rejected() {
        let verifier = SignatureVerifier::new("whsec_test");
        assert!(!verifier.verify(b"{}", "nonsense", Utc::now()).unwrap());
    }

    #[test]
    fn test_parse_checkout_event() {
        let event = json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_1",
                "mode": "payment",
                "payment_status": "paid",
                "metadata": { "plan": "monthly", "email": "a@x.com" }
            } }
        });
        match parse_event(&event).unwrap() {
            BillingEvent::CheckoutCompleted(session) => {
                assert_eq!(session.id, "cs_1");
                assert!(session.payment_complete);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let event = json!({ "type": "customer.updated", "data": { "object": {} } });
        match parse_event(&event).unwrap() {
            BillingEvent::Ignored { event_type } => assert_eq!(event_type, "customer.updated"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_invoice_without_subscription_is_ignored() {
        let event = json!({ "type": "invoice.payment_succeeded", "data": { "object": {} } });
        assert!(matches!(
            parse_event(&event).unwrap(),
            BillingEvent::Ignored { .. }
        ));
    }
}
