//! Outbound activation notifications.
//!
//! Callers fire and forget: a delivery failure is logged, never retried and
//! never allowed to fail the surrounding operation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use shadowlink_core::result::AppResult;

/// What gets sent to a customer after a successful purchase.
///
/// `code_ref` is the stored digest of the activation code — the customer
/// redeems with it; the plaintext never leaves the issuing call.
#[derive(Debug, Clone)]
pub struct ActivationNotice {
    /// Recipient email.
    pub recipient: String,
    /// Opaque code reference (the stored digest).
    pub code_ref: String,
    /// Plan label for the message body.
    pub plan_label: String,
    /// Expiry to mention, when the plan has one.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outbound notification capability.
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Send an activation notice.
    async fn send_activation(&self, notice: ActivationNotice) -> AppResult<()>;
}

/// Notifier that only logs; the default when no mail transport is wired.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_activation(&self, notice: ActivationNotice) -> AppResult<()> {
        info!(
            recipient = %notice.recipient,
            plan = %notice.plan_label,
            code_ref = %&notice.code_ref[..notice.code_ref.len().min(8)],
            "Activation notice dispatched"
        );
        Ok(())
    }
}

/// Notifier that records every notice, for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<ActivationNotice>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to an empty recorder.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All notices sent so far, in order.
    pub async fn sent(&self) -> Vec<ActivationNotice> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_activation(&self, notice: ActivationNotice) -> AppResult<()> {
        self.sent.lock().await.push(notice);
        Ok(())
    }
}
