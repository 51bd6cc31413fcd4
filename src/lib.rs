//! Shadow Link licensing backend — facade crate.
//!
//! Wires stores, the billing oracle, and the services together, and
//! re-exports the public surface the HTTP layer consumes: activation
//! verification, entitlement creation, lifecycle transitions, and webhook
//! routing.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use shadowlink_billing::http::HttpBillingProvider;
use shadowlink_billing::mock::MockBillingProvider;
use shadowlink_billing::oracle::BillingOracle;
use shadowlink_billing::price::PriceResolver;
use shadowlink_billing::provider::BillingProvider;
use shadowlink_billing::webhook::SignatureVerifier;
use shadowlink_core::config::AppConfig;
use shadowlink_core::error::AppError;
use shadowlink_database::memory::{MemoryEntitlementStore, MemoryOwnerStore};
use shadowlink_database::repositories::{PgEntitlementStore, PgOwnerStore};
use shadowlink_database::store::{EntitlementStore, OwnerStore};
use shadowlink_database::DatabasePool;
use shadowlink_service::catalog::PlanCatalog;
use shadowlink_service::notify::{LogNotifier, Notifier};
use shadowlink_service::{
    ActivationVerifier, EntitlementService, SubscriptionLifecycle, WebhookRouter,
};

pub use shadowlink_billing::webhook::{parse_event, BillingEvent};
pub use shadowlink_core::config;
pub use shadowlink_core::{AppError as Error, AppResult};
pub use shadowlink_entity::entitlement::{Entitlement, EntitlementStatus, Plan};
pub use shadowlink_entity::owner::Owner;
pub use shadowlink_entity::verdict::{DenialReason, Verdict};
pub use shadowlink_service::entitlements::CreateEntitlement;
pub use shadowlink_service::lifecycle::{Outcome, Transition};

/// The assembled licensing backend.
#[derive(Debug)]
pub struct LicensingBackend {
    /// Activation verification.
    pub verifier: Arc<ActivationVerifier>,
    /// Entitlement issuance and projections.
    pub entitlements: Arc<EntitlementService>,
    /// Subscription lifecycle transitions.
    pub lifecycle: Arc<SubscriptionLifecycle>,
    /// Webhook event routing.
    pub webhooks: Arc<WebhookRouter>,
    /// Webhook signature verification.
    pub signatures: SignatureVerifier,
}

impl LicensingBackend {
    /// Connect to PostgreSQL, run migrations, and assemble the backend.
    ///
    /// When billing is enabled the HTTP provider is used; otherwise the
    /// mock provider stands in so verification keeps working from stored
    /// state.
    pub async fn connect(config: &AppConfig) -> Result<Self, AppError> {
        let pool = DatabasePool::connect(&config.database).await?;
        shadowlink_database::migration::run_migrations(pool.pool()).await?;

        let entitlements: Arc<dyn EntitlementStore> =
            Arc::new(PgEntitlementStore::new(pool.pool().clone()));
        let owners: Arc<dyn OwnerStore> = Arc::new(PgOwnerStore::new(pool.pool().clone()));

        let provider: Arc<dyn BillingProvider> = if config.billing.enabled {
            Arc::new(HttpBillingProvider::new(&config.billing)?)
        } else {
            Arc::new(MockBillingProvider::new())
        };

        Ok(Self::from_parts(
            config,
            entitlements,
            owners,
            provider,
            Arc::new(LogNotifier),
        ))
    }

    /// Assemble the backend in memory — single-node development and tests.
    pub fn in_memory(
        config: &AppConfig,
        provider: Arc<dyn BillingProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::from_parts(
            config,
            Arc::new(MemoryEntitlementStore::new()),
            Arc::new(MemoryOwnerStore::new()),
            provider,
            notifier,
        )
    }

    /// Assemble the backend from explicit parts.
    pub fn from_parts(
        config: &AppConfig,
        entitlements: Arc<dyn EntitlementStore>,
        owners: Arc<dyn OwnerStore>,
        provider: Arc<dyn BillingProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let catalog = PlanCatalog::from_config(&config.plans);
        let oracle = BillingOracle::new(
            provider,
            Duration::from_secs(config.billing.request_timeout_seconds),
        );
        let prices = Arc::new(PriceResolver::new(oracle.clone()));

        let entitlement_service = Arc::new(EntitlementService::new(
            Arc::clone(&entitlements),
            catalog.clone(),
            notifier,
        ));
        let verifier = Arc::new(ActivationVerifier::new(
            Arc::clone(&entitlements),
            Arc::clone(&owners),
            oracle.clone(),
            catalog.clone(),
        ));
        let lifecycle = Arc::new(SubscriptionLifecycle::new(
            Arc::clone(&owners),
            Arc::clone(&entitlements),
            oracle.clone(),
            prices,
            catalog,
            config.billing.clone(),
        ));
        let webhooks = Arc::new(WebhookRouter::new(
            owners,
            entitlements,
            oracle,
            Arc::clone(&entitlement_service),
            Arc::clone(&lifecycle),
            config.billing.clone(),
        ));

        Self {
            verifier,
            entitlements: entitlement_service,
            lifecycle,
            webhooks,
            signatures: SignatureVerifier::new(config.billing.webhook_secret.clone()),
        }
    }
}

/// Initialize tracing from configuration.
pub fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        _ => {
            fmt().pretty().with_env_filter(filter).with_target(true).init();
        }
    }
}
