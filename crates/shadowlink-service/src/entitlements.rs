//! Entitlement issuance and read-side projections.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use validator::ValidateEmail;

use shadowlink_core::error::{AppError, ErrorKind};
use shadowlink_core::result::AppResult;
use shadowlink_core::types::code::SubmittedCode;
use shadowlink_database::store::EntitlementStore;
use shadowlink_entity::entitlement::{Entitlement, EntitlementStatus, NewEntitlement, Plan};

use crate::catalog::PlanCatalog;
use crate::code;
use crate::notify::{ActivationNotice, Notifier};

/// How many fresh codes to try when the store reports a digest collision.
const CODE_RETRY_LIMIT: usize = 3;

/// Request to create an entitlement for a payment event.
#[derive(Debug, Clone)]
pub struct CreateEntitlement {
    /// Purchaser email (normalized here).
    pub email: String,
    /// Purchased plan.
    pub plan: Plan,
    /// The payment event this entitlement answers to; the idempotency key.
    pub session_ref: Option<String>,
    /// Billing customer reference, when known.
    pub customer_ref: Option<String>,
    /// Billing subscription reference, when known.
    pub subscription_ref: Option<String>,
    /// Provider subscription status to mirror, when known.
    pub subscription_status: Option<String>,
    /// Recurring-period end to mirror, when known.
    pub period_end: Option<DateTime<Utc>>,
    /// Initial status; `Active` for completed payments.
    pub status: EntitlementStatus,
}

/// A created (or replayed) entitlement.
#[derive(Debug, Clone)]
pub struct CreatedEntitlement {
    /// The record.
    pub record: Entitlement,
    /// Whether this call created it (false = idempotent replay).
    pub created: bool,
    /// The plaintext code, only when freshly created. It exists solely for
    /// transport to the customer and is never persisted.
    pub plain_code: Option<String>,
}

/// Read-side status of a single entitlement.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntitlementStatusView {
    /// Stored code digest.
    pub code_ref: Option<String>,
    /// Owner email.
    pub email: String,
    /// Current plan.
    pub plan: Plan,
    /// Reported status; an elapsed expiry reports as `"expired"` even
    /// though the stored status is untouched.
    pub status: String,
    /// Stored expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Originating payment session.
    pub session_ref: Option<String>,
}

/// Issues entitlements and answers read-side questions about them.
#[derive(Debug)]
pub struct EntitlementService {
    store: Arc<dyn EntitlementStore>,
    catalog: PlanCatalog,
    notifier: Arc<dyn Notifier>,
}

impl EntitlementService {
    /// Create the service.
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        catalog: PlanCatalog,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            catalog,
            notifier,
        }
    }

    /// Create an entitlement for a payment event, exactly once.
    ///
    /// Replays of the same `session_ref` return the original record and
    /// send no second notification. A generated-code digest collision is
    /// retried with a fresh code.
    pub async fn create(&self, request: CreateEntitlement) -> AppResult<CreatedEntitlement> {
        let email = normalize_email(&request.email)?;
        let expires_at = match request.plan {
            Plan::Lifetime => None,
            Plan::Monthly => request
                .period_end
                .or_else(|| self.catalog.default_expiry(request.plan, Utc::now())),
        };

        let mut last_err: Option<AppError> = None;
        for _ in 0..CODE_RETRY_LIMIT {
            let plain = code::generate();
            let code_hash = code::digest(&plain);

            let new = NewEntitlement {
                email: email.clone(),
                plan: request.plan,
                code_hash: code_hash.clone(),
                plain_code: None,
                status: request.status,
                expires_at,
                session_ref: request.session_ref.clone(),
                customer_ref: request.customer_ref.clone(),
                subscription_ref: request.subscription_ref.clone(),
                subscription_status: request.subscription_status.clone(),
                period_end: request.period_end,
            };

            match self.store.create_if_absent(new).await {
                Ok((record, true)) => {
                    info!(
                        email = %record.email,
                        plan = %record.plan,
                        session = record.session_ref.as_deref().unwrap_or("-"),
                        "Entitlement created"
                    );
                    self.dispatch_notice(&record).await;
                    return Ok(CreatedEntitlement {
                        record,
                        created: true,
                        plain_code: Some(plain),
                    });
                }
                Ok((record, false)) => {
                    info!(
                        session = record.session_ref.as_deref().unwrap_or("-"),
                        "Entitlement already exists for payment event"
                    );
                    return Ok(CreatedEntitlement {
                        record,
                        created: false,
                        plain_code: None,
                    });
                }
                Err(e) if e.kind == ErrorKind::Conflict => {
                    warn!("Activation code digest collision, regenerating");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| AppError::internal("Code generation retries exhausted")))
    }

    /// Status projection for a submitted code or digest.
    pub async fn status_by_code(&self, submitted: &str) -> AppResult<Option<EntitlementStatusView>> {
        let record = match SubmittedCode::classify(submitted) {
            SubmittedCode::Digest(digest) => self.store.find_by_code_hash(&digest).await?,
            SubmittedCode::Plain(plain) => {
                let digest = code::digest(&plain);
                match self.store.find_by_code_hash(&digest).await? {
                    Some(record) => Some(record),
                    None => self.store.find_by_plain_code(&plain).await?,
                }
            }
        };

        Ok(record.map(|record| {
            let status = if record.is_active() && record.is_expired(Utc::now()) {
                "expired".to_string()
            } else {
                record.status.to_string()
            };
            EntitlementStatusView {
                code_ref: record.code_hash,
                email: record.email,
                plan: record.plan,
                status,
                expires_at: record.expires_at,
                created_at: record.created_at,
                session_ref: record.session_ref,
            }
        }))
    }

    /// The newest still-valid active entitlement for an email, if any.
    pub async fn active_entitlement_for_email(
        &self,
        email: &str,
    ) -> AppResult<Option<Entitlement>> {
        let email = normalize_email(email)?;
        let now = Utc::now();
        let records = self.store.find_active_for_email(&email).await?;
        Ok(records.into_iter().find(|r| !r.is_expired(now)))
    }

    async fn dispatch_notice(&self, record: &Entitlement) {
        let Some(code_ref) = record.code_hash.clone() else {
            return;
        };
        let notice = ActivationNotice {
            recipient: record.email.clone(),
            code_ref,
            plan_label: self.catalog.resolve(record.plan).label.clone(),
            expires_at: record.expires_at,
        };
        if let Err(e) = self.notifier.send_activation(notice).await {
            warn!(error = %e, email = %record.email, "Activation notice delivery failed");
        }
    }
}

/// Normalize and validate an email address.
pub fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    if !email.validate_email() {
        return Err(AppError::validation(format!("Invalid email: '{raw}'")));
    }
    Ok(email)
}
