//! Shared test harness: memory stores + mock billing provider wired into
//! the full backend.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use shadowlink_billing::mock::MockBillingProvider;
use shadowlink_billing::types::{SubscriptionState, SubscriptionView};
use shadowlink_core::config::billing::BillingConfig;
use shadowlink_core::config::{AppConfig, DatabaseConfig};
use shadowlink_database::memory::{MemoryEntitlementStore, MemoryOwnerStore};
use shadowlink_database::store::{EntitlementStore, OwnerStore};
use shadowlink_entity::entitlement::{Entitlement, EntitlementStatus, Plan};
use shadowlink_entity::owner::{Owner, OwnerPatch};
use shadowlink_licensing::{CreateEntitlement, LicensingBackend};
use shadowlink_service::notify::RecordingNotifier;

/// Fully wired backend over memory stores and the mock provider.
pub struct TestApp {
    pub backend: LicensingBackend,
    pub provider: Arc<MockBillingProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub entitlements: Arc<MemoryEntitlementStore>,
    pub owners: Arc<MemoryOwnerStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let provider = Arc::new(MockBillingProvider::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let entitlements = Arc::new(MemoryEntitlementStore::new());
        let owners = Arc::new(MemoryOwnerStore::new());

        let entitlement_store: Arc<dyn EntitlementStore> = entitlements.clone();
        let owner_store: Arc<dyn OwnerStore> = owners.clone();

        let backend = LicensingBackend::from_parts(
            &config,
            entitlement_store,
            owner_store,
            provider.clone(),
            notifier.clone(),
        );

        Self {
            backend,
            provider,
            notifier,
            entitlements,
            owners,
        }
    }

    /// Create a monthly entitlement funded by a one-time session; returns
    /// the record and its plaintext code.
    pub async fn monthly_purchase(&self, email: &str, session_ref: &str) -> (Entitlement, String) {
        let created = self
            .backend
            .entitlements
            .create(CreateEntitlement {
                email: email.to_string(),
                plan: Plan::Monthly,
                session_ref: Some(session_ref.to_string()),
                customer_ref: None,
                subscription_ref: None,
                subscription_status: None,
                period_end: None,
                status: EntitlementStatus::Active,
            })
            .await
            .expect("entitlement creation failed");
        let code = created.plain_code.clone().expect("fresh record has a code");
        (created.record, code)
    }

    /// Create an owner with a live provider subscription and a matching
    /// entitlement record.
    pub async fn owner_with_subscription(
        &self,
        email: &str,
        plan: Plan,
        subscription_ref: &str,
        customer_ref: &str,
    ) -> (Owner, Entitlement, String) {
        let owner = self.owners.create_if_absent(email).await.unwrap();
        let owner = self
            .owners
            .apply(
                owner.id,
                OwnerPatch {
                    customer_ref: Some(Some(customer_ref.to_string())),
                    subscription_ref: Some(Some(subscription_ref.to_string())),
                    subscription_status: Some(Some("active".to_string())),
                    plan: Some(Some(plan)),
                    current_period_end: Some(Some(Utc::now() + Duration::days(15))),
                },
            )
            .await
            .unwrap();

        self.provider
            .put_subscription(active_subscription(subscription_ref, customer_ref, plan));

        let created = self
            .backend
            .entitlements
            .create(CreateEntitlement {
                email: email.to_string(),
                plan,
                session_ref: Some(format!("cs_for_{subscription_ref}")),
                customer_ref: Some(customer_ref.to_string()),
                subscription_ref: Some(subscription_ref.to_string()),
                subscription_status: Some("active".to_string()),
                period_end: Some(Utc::now() + Duration::days(15)),
                status: EntitlementStatus::Active,
            })
            .await
            .unwrap();
        let code = created.plain_code.clone().unwrap();
        (owner, created.record, code)
    }

    pub async fn record(&self, record: &Entitlement) -> Entitlement {
        self.entitlements
            .find_by_id(record.id)
            .await
            .unwrap()
            .expect("record exists")
    }
}

/// A subscription mid-period: started 15 days ago, 15 days remaining.
pub fn active_subscription(
    subscription_ref: &str,
    customer_ref: &str,
    plan: Plan,
) -> SubscriptionView {
    subscription_with_period(
        subscription_ref,
        customer_ref,
        plan,
        Utc::now() - Duration::days(15),
        Utc::now() + Duration::days(15),
    )
}

pub fn subscription_with_period(
    subscription_ref: &str,
    customer_ref: &str,
    plan: Plan,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> SubscriptionView {
    SubscriptionView {
        id: subscription_ref.to_string(),
        customer_ref: Some(customer_ref.to_string()),
        state: SubscriptionState::Active,
        current_period_start: Some(period_start),
        current_period_end: Some(period_end),
        cancel_at_period_end: false,
        plan_hint: Some(plan),
        service_enabled: true,
        created_at: Some(period_start),
        downgraded_from_lifetime: false,
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout_seconds: 1,
            idle_timeout_seconds: 1,
        },
        billing: BillingConfig {
            enabled: true,
            ..BillingConfig::default()
        },
        plans: Default::default(),
        logging: Default::default(),
    }
}
