//! Integration tests for webhook event routing.

mod common;

use chrono::{Duration, Utc};

use common::{subscription_with_period, TestApp};
use shadowlink_billing::types::{SessionMode, SessionView, SubscriptionState};
use shadowlink_billing::webhook::BillingEvent;
use shadowlink_database::store::{EntitlementStore, OwnerStore};
use shadowlink_entity::entitlement::{EntitlementStatus, Plan};
use shadowlink_entity::owner::OwnerPatch;

fn paid_session(id: &str, plan: Plan, email: &str) -> SessionView {
    SessionView {
        id: id.to_string(),
        mode: SessionMode::Payment,
        payment_complete: true,
        customer_ref: None,
        subscription_ref: None,
        email: Some(email.to_string()),
        plan_hint: Some(plan),
        owner_hint: None,
        action_hint: None,
        created_at: Some(Utc::now()),
    }
}

#[tokio::test]
async fn test_replayed_checkout_creates_one_record_and_one_notice() {
    let app = TestApp::new();
    let session = paid_session("cs_1", Plan::Monthly, "a@x.com");

    app.backend
        .webhooks
        .route(BillingEvent::CheckoutCompleted(session.clone()))
        .await
        .unwrap();
    app.backend
        .webhooks
        .route(BillingEvent::CheckoutCompleted(session))
        .await
        .unwrap();

    let records = app.entitlements.find_active_for_email("a@x.com").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(app.notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn test_unpaid_session_creates_nothing() {
    let app = TestApp::new();
    let mut session = paid_session("cs_1", Plan::Monthly, "a@x.com");
    session.payment_complete = false;

    app.backend
        .webhooks
        .route(BillingEvent::CheckoutCompleted(session))
        .await
        .unwrap();

    assert!(app
        .entitlements
        .find_active_for_email("a@x.com")
        .await
        .unwrap()
        .is_empty());
    assert!(app.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn test_subscription_cancellation_revokes_the_group() {
    let app = TestApp::new();
    let (_, record, _) = app
        .owner_with_subscription("c@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    let mut view = common::active_subscription("sub_1", "cus_1", Plan::Monthly);
    view.state = SubscriptionState::Canceled;
    app.backend
        .webhooks
        .route(BillingEvent::SubscriptionChanged(view))
        .await
        .unwrap();

    let stored = app.record(&record).await;
    assert_eq!(stored.status, EntitlementStatus::Revoked);
    assert_eq!(stored.subscription_status.as_deref(), Some("canceled"));
}

#[tokio::test]
async fn test_renewal_refreshes_expiry_and_resurrects() {
    let app = TestApp::new();
    let (_, record, _) = app
        .owner_with_subscription("r@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    // Simulate an earlier revocation from a failed payment.
    app.entitlements
        .apply(
            record.id,
            shadowlink_entity::entitlement::EntitlementPatch {
                status: Some(EntitlementStatus::Revoked),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let new_period_end = Utc::now() + Duration::days(45);
    let view = subscription_with_period(
        "sub_1",
        "cus_1",
        Plan::Monthly,
        Utc::now() - Duration::days(1),
        new_period_end,
    );
    app.provider.put_subscription(view.clone());
    app.backend
        .webhooks
        .route(BillingEvent::InvoicePaid {
            subscription_ref: "sub_1".to_string(),
        })
        .await
        .unwrap();

    let stored = app.record(&record).await;
    assert_eq!(stored.status, EntitlementStatus::Active);
    assert_eq!(stored.expires_at, Some(new_period_end));
    assert_eq!(stored.period_end, Some(new_period_end));
}

#[tokio::test]
async fn test_fresh_subscription_mints_an_entitlement_once() {
    let app = TestApp::new();
    let owner = app.owners.create_if_absent("new@x.com").await.unwrap();
    app.owners
        .apply(
            owner.id,
            OwnerPatch {
                customer_ref: Some(Some("cus_1".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Created moments ago: within the freshness window.
    let view = subscription_with_period(
        "sub_new",
        "cus_1",
        Plan::Monthly,
        Utc::now() - Duration::minutes(1),
        Utc::now() + Duration::days(30),
    );
    app.backend
        .webhooks
        .route(BillingEvent::SubscriptionChanged(view.clone()))
        .await
        .unwrap();

    let records = app
        .entitlements
        .find_active_for_email("new@x.com")
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].subscription_ref.as_deref(), Some("sub_new"));
    assert_eq!(app.notifier.sent().await.len(), 1);

    // Replay: the group is no longer empty, nothing new is minted.
    app.backend
        .webhooks
        .route(BillingEvent::SubscriptionChanged(view))
        .await
        .unwrap();
    assert_eq!(
        app.entitlements
            .find_active_for_email("new@x.com")
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(app.notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn test_old_subscription_never_mints_on_renewal() {
    let app = TestApp::new();
    let owner = app.owners.create_if_absent("old@x.com").await.unwrap();
    app.owners
        .apply(
            owner.id,
            OwnerPatch {
                customer_ref: Some(Some("cus_1".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Created an hour ago: a renewal of a subscription whose records are
    // gone must not resurrect one.
    let view = subscription_with_period(
        "sub_old",
        "cus_1",
        Plan::Monthly,
        Utc::now() - Duration::hours(1),
        Utc::now() + Duration::days(30),
    );
    app.backend
        .webhooks
        .route(BillingEvent::SubscriptionChanged(view))
        .await
        .unwrap();

    assert!(app
        .entitlements
        .find_active_for_email("old@x.com")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_lifetime_payment_cascades_an_upgrade() {
    let app = TestApp::new();
    let (owner, record, _) = app
        .owner_with_subscription("up@x.com", Plan::Monthly, "sub_1", "cus_1")
        .await;

    let mut session = paid_session("cs_up", Plan::Lifetime, "up@x.com");
    session.owner_hint = Some(owner.id);
    session.customer_ref = Some("cus_1".to_string());
    session.action_hint = Some(shadowlink_billing::types::CheckoutAction::Upgrade);

    app.backend
        .webhooks
        .route(BillingEvent::CheckoutCompleted(session))
        .await
        .unwrap();

    let stored = app.record(&record).await;
    assert_eq!(stored.plan, Plan::Lifetime);
    assert!(stored.expires_at.is_none());
    assert_eq!(stored.status, EntitlementStatus::Active);

    let owner = app.owners.find_by_id(owner.id).await.unwrap().unwrap();
    assert_eq!(owner.plan, Some(Plan::Lifetime));

    // The old subscription is left to lapse at period end.
    let sub = app.provider.subscription("sub_1").unwrap();
    assert!(sub.cancel_at_period_end);
}

#[tokio::test]
async fn test_session_payment_failure_revokes_the_record() {
    let app = TestApp::new();
    let (record, _) = app.monthly_purchase("f@x.com", "cs_fail").await;

    app.backend
        .webhooks
        .route(BillingEvent::SessionPaymentFailed {
            session_ref: Some("cs_fail".to_string()),
        })
        .await
        .unwrap();

    let stored = app.record(&record).await;
    assert_eq!(stored.status, EntitlementStatus::Revoked);
}

#[tokio::test]
async fn test_unknown_events_are_a_no_op() {
    let app = TestApp::new();
    app.backend
        .webhooks
        .route(BillingEvent::Ignored {
            event_type: "customer.updated".to_string(),
        })
        .await
        .unwrap();
    assert!(app.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn test_subscription_checkout_completion_mints_via_session() {
    let app = TestApp::new();
    let owner = app.owners.create_if_absent("sub@x.com").await.unwrap();
    app.owners
        .apply(
            owner.id,
            OwnerPatch {
                customer_ref: Some(Some("cus_1".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    app.provider.put_subscription(subscription_with_period(
        "sub_1",
        "cus_1",
        Plan::Monthly,
        Utc::now() - Duration::minutes(1),
        Utc::now() + Duration::days(30),
    ));

    let session = SessionView {
        id: "cs_sub".to_string(),
        mode: SessionMode::Subscription,
        payment_complete: true,
        customer_ref: Some("cus_1".to_string()),
        subscription_ref: Some("sub_1".to_string()),
        email: Some("sub@x.com".to_string()),
        plan_hint: Some(Plan::Monthly),
        owner_hint: Some(owner.id),
        action_hint: None,
        created_at: Some(Utc::now()),
    };
    app.backend
        .webhooks
        .route(BillingEvent::CheckoutCompleted(session))
        .await
        .unwrap();

    let records = app
        .entitlements
        .find_active_for_email("sub@x.com")
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    // The entitlement is keyed to the checkout session, not the
    // subscription, so a later bare subscription event cannot duplicate it.
    assert_eq!(records[0].session_ref.as_deref(), Some("cs_sub"));

    let owner = app.owners.find_by_id(owner.id).await.unwrap().unwrap();
    assert_eq!(owner.subscription_ref.as_deref(), Some("sub_1"));
    assert_eq!(owner.plan, Some(Plan::Monthly));
}
