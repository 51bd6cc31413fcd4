//! Integration tests for activation verification.

mod common;

use chrono::{Duration, Utc};

use common::TestApp;
use shadowlink_billing::types::SubscriptionState;
use shadowlink_database::store::EntitlementStore;
use shadowlink_entity::entitlement::{EntitlementPatch, EntitlementStatus, Plan};
use shadowlink_licensing::{DenialReason, Verdict};

#[tokio::test]
async fn test_fresh_monthly_purchase_verifies_and_binds() {
    let app = TestApp::new();
    let (record, code) = app.monthly_purchase("a@x.com", "evt_1").await;

    let expires = record.expires_at.expect("monthly purchase gets an expiry");
    let expected = Utc::now() + Duration::days(30);
    assert!((expires - expected).num_seconds().abs() < 5);

    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    match verdict {
        Verdict::Granted(entitled) => {
            assert_eq!(entitled.plan, Plan::Monthly);
            assert_eq!(entitled.device_id, "dev1");
            assert_eq!(entitled.subscription_status, "active");
        }
        Verdict::Denied { reason } => panic!("expected grant, got {reason}"),
    }

    let stored = app.record(&record).await;
    assert_eq!(stored.redeemed_device_id.as_deref(), Some("dev1"));
    assert!(stored.redeemed_at.is_some());
}

#[tokio::test]
async fn test_digest_submission_is_accepted() {
    let app = TestApp::new();
    let (record, _code) = app.monthly_purchase("a@x.com", "evt_1").await;

    let digest = record.code_hash.clone().unwrap();
    let verdict = app.backend.verifier.verify(&digest, "dev1").await.unwrap();
    assert!(verdict.is_granted());
}

#[tokio::test]
async fn test_unknown_code_is_not_found() {
    let app = TestApp::new();
    let verdict = app
        .backend
        .verifier
        .verify("AAAA1111BBBB2222", "dev1")
        .await
        .unwrap();
    assert_eq!(verdict.reason(), Some(DenialReason::NotFound));
}

#[tokio::test]
async fn test_missing_device_is_a_caller_error() {
    let app = TestApp::new();
    let (_, code) = app.monthly_purchase("a@x.com", "evt_1").await;

    let verdict = app.backend.verifier.verify(&code, "  ").await.unwrap();
    assert_eq!(verdict.reason(), Some(DenialReason::DeviceRequired));
}

#[tokio::test]
async fn test_device_binding_is_one_way() {
    let app = TestApp::new();
    let (_, code) = app.monthly_purchase("a@x.com", "evt_1").await;

    assert!(app
        .backend
        .verifier
        .verify(&code, "deviceA")
        .await
        .unwrap()
        .is_granted());

    let other = app.backend.verifier.verify(&code, "deviceB").await.unwrap();
    assert_eq!(other.reason(), Some(DenialReason::DeviceMismatch));

    // The original device keeps working.
    assert!(app
        .backend
        .verifier
        .verify(&code, "deviceA")
        .await
        .unwrap()
        .is_granted());
}

#[tokio::test]
async fn test_concurrent_redemption_binds_exactly_once() {
    let app = TestApp::new();
    let (_, code) = app.monthly_purchase("a@x.com", "evt_1").await;

    let (first, second) = tokio::join!(
        app.backend.verifier.verify(&code, "deviceA"),
        app.backend.verifier.verify(&code, "deviceB"),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    let grants = [&first, &second]
        .iter()
        .filter(|v| v.is_granted())
        .count();
    assert_eq!(grants, 1, "exactly one device wins the race");
    let loser = if first.is_granted() { second } else { first };
    assert_eq!(loser.reason(), Some(DenialReason::DeviceMismatch));
}

#[tokio::test]
async fn test_lifetime_never_expires_and_reports_active() {
    let app = TestApp::new();
    let created = app
        .backend
        .entitlements
        .create(shadowlink_licensing::CreateEntitlement {
            email: "life@x.com".to_string(),
            plan: Plan::Lifetime,
            session_ref: Some("evt_life".to_string()),
            customer_ref: None,
            subscription_ref: None,
            subscription_status: Some("canceled".to_string()),
            period_end: None,
            status: EntitlementStatus::Active,
        })
        .await
        .unwrap();
    let code = created.plain_code.unwrap();

    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    match verdict {
        Verdict::Granted(entitled) => {
            assert_eq!(entitled.plan, Plan::Lifetime);
            assert!(entitled.expires_at.is_none());
            // Stale subscription bookkeeping never shows through.
            assert_eq!(entitled.subscription_status, "active");
        }
        Verdict::Denied { reason } => panic!("expected grant, got {reason}"),
    }
}

#[tokio::test]
async fn test_monthly_expiry_boundary() {
    let app = TestApp::new();
    let (record, code) = app.monthly_purchase("a@x.com", "evt_1").await;

    // Just before expiry: grant.
    app.entitlements
        .apply(
            record.id,
            EntitlementPatch {
                expires_at: Some(Some(Utc::now() + Duration::seconds(30))),
                ..EntitlementPatch::default()
            },
        )
        .await
        .unwrap();
    assert!(app
        .backend
        .verifier
        .verify(&code, "dev1")
        .await
        .unwrap()
        .is_granted());

    // Just past expiry: denied.
    app.entitlements
        .apply(
            record.id,
            EntitlementPatch {
                expires_at: Some(Some(Utc::now() - Duration::seconds(1))),
                ..EntitlementPatch::default()
            },
        )
        .await
        .unwrap();
    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    assert_eq!(verdict.reason(), Some(DenialReason::Expired));
}

#[tokio::test]
async fn test_revocation_sticky_until_provider_resurrection() {
    let app = TestApp::new();
    let (_, record, code) = app
        .owner_with_subscription("s@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

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

    // Revoked + provider says canceled: denied as expired.
    app.provider
        .set_subscription_state("sub_1", SubscriptionState::Canceled);
    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    assert_eq!(verdict.reason(), Some(DenialReason::Expired));

    // Provider recovers: next verify both grants and heals the record.
    app.provider
        .set_subscription_state("sub_1", SubscriptionState::Active);
    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    assert!(verdict.is_granted());

    let stored = app.record(&record).await;
    assert_eq!(stored.status, EntitlementStatus::Active);
}

#[tokio::test]
async fn test_service_disabled_gates_an_otherwise_valid_subscription() {
    let app = TestApp::new();
    let (_, _, code) = app
        .owner_with_subscription("s@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    app.provider.set_subscription_service_enabled("sub_1", false);
    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    assert_eq!(verdict.reason(), Some(DenialReason::ServiceDisabled));

    app.provider.set_subscription_service_enabled("sub_1", true);
    assert!(app
        .backend
        .verifier
        .verify(&code, "dev1")
        .await
        .unwrap()
        .is_granted());
}

#[tokio::test]
async fn test_plan_hint_corrects_the_record() {
    let app = TestApp::new();
    let (_, record, code) = app
        .owner_with_subscription("s@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    // The customer upgraded between purchase and redemption.
    app.provider
        .set_subscription_plan_hint("sub_1", Some(Plan::Lifetime));

    let verdict = app.backend.verifier.verify(&code, "dev1").await.unwrap();
    match verdict {
        Verdict::Granted(entitled) => {
            assert_eq!(entitled.plan, Plan::Lifetime);
            assert!(entitled.expires_at.is_none());
        }
        Verdict::Denied { reason } => panic!("expected grant, got {reason}"),
    }

    let stored = app.record(&record).await;
    assert_eq!(stored.plan, Plan::Lifetime);
    assert!(stored.expires_at.is_none());
}

#[tokio::test]
async fn test_provider_outage_falls_back_to_stored_state() {
    let app = TestApp::new();
    let (_, _, code) = app
        .owner_with_subscription("s@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    app.provider.set_offline(true);

    // Stored expiry is still in the future, so the fallback grants; the
    // outage itself never denies (or grants) by error.
    assert!(app
        .backend
        .verifier
        .verify(&code, "dev1")
        .await
        .unwrap()
        .is_granted());
}

#[tokio::test]
async fn test_legacy_plaintext_record_migrates_on_first_use() {
    use chrono::Utc;
    use shadowlink_core::types::id::EntitlementId;
    use shadowlink_entity::entitlement::Entitlement;

    let app = TestApp::new();
    let now = Utc::now();
    let legacy_code = "LEGACY1234567890";
    app.entitlements
        .insert_raw(Entitlement {
            id: EntitlementId::new(),
            email: "old@x.com".to_string(),
            plan: Plan::Lifetime,
            code_hash: None,
            plain_code: Some(legacy_code.to_string()),
            status: EntitlementStatus::Active,
            expires_at: None,
            session_ref: None,
            customer_ref: None,
            subscription_ref: None,
            subscription_status: None,
            period_end: None,
            redeemed_device_id: None,
            redeemed_at: None,
            created_at: now,
            updated_at: now,
        })
        .await;

    let verdict = app
        .backend
        .verifier
        .verify(legacy_code, "dev1")
        .await
        .unwrap();
    assert!(verdict.is_granted());

    // Migrated in place: digest-keyed from now on, plaintext discarded.
    let migrated = app
        .entitlements
        .find_by_plain_code(legacy_code)
        .await
        .unwrap();
    assert!(migrated.is_none());
    assert!(app
        .backend
        .verifier
        .verify(legacy_code, "dev1")
        .await
        .unwrap()
        .is_granted());
}
