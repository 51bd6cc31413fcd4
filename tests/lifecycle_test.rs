//! Integration tests for subscription lifecycle transitions.

mod common;

use chrono::{Duration, Utc};

use common::{test_config, TestApp};
use shadowlink_billing::types::{CheckoutLine, SubscriptionState};
use shadowlink_core::error::ErrorKind;
use shadowlink_database::store::{EntitlementStore, OwnerStore};
use shadowlink_entity::entitlement::{EntitlementPatch, EntitlementStatus, Plan};
use shadowlink_licensing::{Outcome, Transition};

#[tokio::test]
async fn test_checkout_creates_customer_and_session() {
    let app = TestApp::new();
    let owner = app.owners.create_if_absent("buyer@x.com").await.unwrap();

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::Checkout { plan: Plan::Monthly })
        .await
        .unwrap();

    match outcome {
        Outcome::CheckoutStarted { session_ref, url } => {
            assert!(url.is_some());
            assert!(!session_ref.is_empty());
        }
        other => panic!("expected checkout, got {other:?}"),
    }

    let owner = app.owners.find_by_id(owner.id).await.unwrap().unwrap();
    assert!(owner.customer_ref.is_some());
    assert_eq!(app.provider.checkouts().len(), 1);
}

#[tokio::test]
async fn test_checkout_requires_billing_config() {
    let mut config = test_config();
    config.billing.enabled = false;
    let app = TestApp::with_config(config);
    let owner = app.owners.create_if_absent("buyer@x.com").await.unwrap();

    let err = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::Checkout { plan: Plan::Monthly })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
}

#[tokio::test]
async fn test_upgrade_midway_charges_the_difference() {
    let app = TestApp::new();
    let (owner, _, _) = app
        .owner_with_subscription("up@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::ChangePlan { target: Plan::Lifetime })
        .await
        .unwrap();

    match outcome {
        Outcome::CheckoutStarted { .. } => {}
        other => panic!("expected upgrade checkout, got {other:?}"),
    }

    // Half the 4000¢ monthly period remains, so the one-off charge is the
    // 12000¢ lifetime price minus ~2000¢ of credit.
    let checkouts = app.provider.checkouts();
    let upgrade = checkouts.last().unwrap();
    match &upgrade.line {
        CheckoutLine::Amount { amount_cents, .. } => {
            assert!((9_990..=10_010).contains(amount_cents), "got {amount_cents}");
        }
        other => panic!("expected one-off amount, got {other:?}"),
    }
}

#[tokio::test]
async fn test_upgrade_flips_free_when_remaining_value_covers_lifetime() {
    let mut config = test_config();
    config.plans.monthly.price_cents = 15_000;
    config.plans.lifetime.price_cents = 12_000;
    let app = TestApp::with_config(config);

    let (owner, record, code) = app
        .owner_with_subscription("up@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;
    // Period almost untouched: nearly the full 15000¢ remains as credit.
    app.provider.put_subscription(common::subscription_with_period(
        "sub_1",
        "cus_1",
        Plan::Monthly,
        Utc::now() - Duration::minutes(1),
        Utc::now() + Duration::days(30),
    ));

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::ChangePlan { target: Plan::Lifetime })
        .await
        .unwrap();

    match outcome {
        Outcome::PlanChanged { plan, cascaded } => {
            assert_eq!(plan, Plan::Lifetime);
            assert_eq!(cascaded, 1);
        }
        other => panic!("expected free flip, got {other:?}"),
    }

    // The cascade reached the entitlement record...
    let stored = app.record(&record).await;
    assert_eq!(stored.plan, Plan::Lifetime);
    assert!(stored.expires_at.is_none());

    // ...and the next verification reports the new plan.
    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    match verdict {
        shadowlink_licensing::Verdict::Granted(entitled) => {
            assert_eq!(entitled.plan, Plan::Lifetime);
            assert!(entitled.expires_at.is_none());
        }
        other => panic!("expected grant, got {other:?}"),
    }
}

#[tokio::test]
async fn test_downgrade_starts_a_trial_checkout() {
    let app = TestApp::new();
    let owner = app.owners.create_if_absent("down@x.com").await.unwrap();
    let owner = app
        .owners
        .apply(
            owner.id,
            shadowlink_entity::owner::OwnerPatch {
                plan: Some(Some(Plan::Lifetime)),
                customer_ref: Some(Some("cus_1".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::ChangePlan { target: Plan::Monthly })
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::CheckoutStarted { .. }));

    let checkouts = app.provider.checkouts();
    let downgrade = checkouts.last().unwrap();
    assert_eq!(downgrade.trial_days, Some(30));
    assert!(downgrade.downgraded_from_lifetime);
}

#[tokio::test]
async fn test_deferred_cancel_keeps_entitlements_active() {
    let app = TestApp::new();
    let (owner, record, _) = app
        .owner_with_subscription("c@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::Cancel { immediate: false })
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::CancelScheduled { .. }));

    let stored = app.record(&record).await;
    assert_eq!(stored.status, EntitlementStatus::Active);

    let sub = app.provider.subscription("sub_1").unwrap();
    assert!(sub.cancel_at_period_end);
}

#[tokio::test]
async fn test_immediate_cancel_revokes_entitlements() {
    let app = TestApp::new();
    let (owner, record, code) = app
        .owner_with_subscription("c@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::Cancel { immediate: true })
        .await
        .unwrap();
    match outcome {
        Outcome::Canceled { revoked } => assert_eq!(revoked, 1),
        other => panic!("expected cancellation, got {other:?}"),
    }

    let stored = app.record(&record).await;
    assert_eq!(stored.status, EntitlementStatus::Revoked);

    // Provider now reports canceled, so verification denies.
    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    assert!(!verdict.is_granted());
}

#[tokio::test]
async fn test_revoke_works_for_lifetime_without_subscription() {
    let app = TestApp::new();
    let owner = app.owners.create_if_absent("life@x.com").await.unwrap();
    let owner = app
        .owners
        .apply(
            owner.id,
            shadowlink_entity::owner::OwnerPatch {
                plan: Some(Some(Plan::Lifetime)),
                customer_ref: Some(Some("cus_9".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let created = app
        .backend
        .entitlements
        .create(shadowlink_licensing::CreateEntitlement {
            email: "life@x.com".to_string(),
            plan: Plan::Lifetime,
            session_ref: Some("evt_life".to_string()),
            customer_ref: Some("cus_9".to_string()),
            subscription_ref: None,
            subscription_status: None,
            period_end: None,
            status: EntitlementStatus::Active,
        })
        .await
        .unwrap();

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::Revoke)
        .await
        .unwrap();
    match outcome {
        Outcome::Revoked { revoked } => assert_eq!(revoked, 1),
        other => panic!("expected revocation, got {other:?}"),
    }

    let stored = app.record(&created.record).await;
    assert_eq!(stored.status, EntitlementStatus::Revoked);
    let owner = app.owners.find_by_id(owner.id).await.unwrap().unwrap();
    assert!(owner.plan.is_none());
}

#[tokio::test]
async fn test_reactivate_restores_the_group() {
    let app = TestApp::new();
    let (owner, record, _) = app
        .owner_with_subscription("r@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    app.backend
        .lifecycle
        .apply(owner.id, Transition::Cancel { immediate: false })
        .await
        .unwrap();
    app.entitlements
        .apply(
            record.id,
            EntitlementPatch {
                status: Some(EntitlementStatus::Revoked),
                ..EntitlementPatch::default()
            },
        )
        .await
        .unwrap();

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::Reactivate)
        .await
        .unwrap();
    match outcome {
        Outcome::Reactivated { restored } => assert_eq!(restored, 1),
        other => panic!("expected reactivation, got {other:?}"),
    }

    let stored = app.record(&record).await;
    assert_eq!(stored.status, EntitlementStatus::Active);
    assert!(stored.expires_at.is_some());
}

#[tokio::test]
async fn test_stop_and_start_service_round_trip() {
    let app = TestApp::new();
    let (owner, record, code) = app
        .owner_with_subscription("svc@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::StopService)
        .await
        .unwrap();
    match outcome {
        Outcome::ServiceStopped { revoked } => assert_eq!(revoked, 1),
        other => panic!("expected stop, got {other:?}"),
    }

    // The kill switch denies even though the subscription itself is fine.
    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    assert_eq!(
        verdict.reason(),
        Some(shadowlink_licensing::DenialReason::ServiceDisabled)
    );

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::StartService)
        .await
        .unwrap();
    match outcome {
        Outcome::ServiceStarted { restored } => assert_eq!(restored, 1),
        other => panic!("expected start, got {other:?}"),
    }

    let stored = app.record(&record).await;
    assert_eq!(stored.status, EntitlementStatus::Active);
    assert!(app
        .backend
        .verifier
        .verify(&code, "dev1")
        .await
        .unwrap()
        .is_granted());
}

#[tokio::test]
async fn test_start_service_refuses_an_inactive_subscription() {
    let app = TestApp::new();
    let (owner, _, _) = app
        .owner_with_subscription("svc@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    app.backend
        .lifecycle
        .apply(owner.id, Transition::StopService)
        .await
        .unwrap();
    app.provider
        .set_subscription_state("sub_1", SubscriptionState::Canceled);

    let err = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::StartService)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_delete_removes_records_and_keeps_customer() {
    let app = TestApp::new();
    let (owner, record, _) = app
        .owner_with_subscription("d@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    let outcome = app
        .backend
        .lifecycle
        .apply(owner.id, Transition::Delete)
        .await
        .unwrap();
    match outcome {
        Outcome::Deleted { removed } => assert_eq!(removed, 1),
        other => panic!("expected deletion, got {other:?}"),
    }

    assert!(app
        .entitlements
        .find_by_id(record.id)
        .await
        .unwrap()
        .is_none());

    let owner = app.owners.find_by_id(owner.id).await.unwrap().unwrap();
    assert!(owner.subscription_ref.is_none());
    assert!(owner.plan.is_none());
    // Customer reference survives for future repurchase.
    assert_eq!(owner.customer_ref.as_deref(), Some("cus_1"));
}
