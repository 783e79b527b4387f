mod common;

use common::*;
use membership_sync::domain::event::ProcessResult;
use membership_sync::domain::id::SubscriptionId;
use membership_sync::domain::subscription::{RefundPolicy, SubscriptionStatus};
use serde_json::json;
use uuid::Uuid;

const DB: &str = "membership_sync_test_subscription";

async fn confirm(rec: &membership_sync::services::reconcile::Reconciler, pay: &str, sub: &str) {
    rec.apply(
        &payment_event(
            "PAYMENT_CONFIRMED",
            pay,
            Some(&fresh_id("evt")),
            json!({ "subscription": sub }),
        ),
        ACTOR,
    )
    .await
    .expect("confirm failed");
}

#[tokio::test]
async fn first_payment_activates_pending_subscription() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");
    let pay = fresh_id("pay");

    let sub = checkout(&rec, user, tier, Some(&gid)).await;
    assert_eq!(sub.status, SubscriptionStatus::Pending);
    assert_eq!(sub.id.as_str(), gid);

    let created = rec
        .apply(&subscription_event("SUBSCRIPTION_CREATED", &gid, Some(&fresh_id("evt")), json!({})), ACTOR)
        .await
        .unwrap();
    assert_eq!(created, ProcessResult::Unchanged(gid.clone()));

    rec.apply(
        &payment_event("PAYMENT_CREATED", &pay, Some(&fresh_id("evt")), json!({ "subscription": gid })),
        ACTOR,
    )
    .await
    .unwrap();
    assert_eq!(subscription_row(&pool, &gid).await.status, "pending");
    assert_eq!(entitlement(&pool, user).await, (None, None));

    confirm(&rec, &pay, &gid).await;

    let row = subscription_row(&pool, &gid).await;
    assert_eq!(row.status, "active");
    assert_eq!(row.activated_by_payment_id.as_deref(), Some(pay.as_str()));
    assert_eq!(entitlement(&pool, user).await, (Some(tier), Some(gid.clone())));
    assert_eq!(count_audit(&pool, &user.to_string(), "entitlement_changed").await, 1);
    assert_entitlement_consistent(&pool, user).await;
}

#[tokio::test]
async fn confirmation_before_subscription_created_still_activates() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");

    checkout(&rec, user, tier, Some(&gid)).await;
    confirm(&rec, &fresh_id("pay"), &gid).await;

    let late = rec
        .apply(&subscription_event("SUBSCRIPTION_CREATED", &gid, Some(&fresh_id("evt")), json!({})), ACTOR)
        .await
        .unwrap();

    assert_eq!(late, ProcessResult::OutOfOrder(gid.clone()));
    assert_eq!(subscription_row(&pool, &gid).await.status, "active");
    assert_entitlement_consistent(&pool, user).await;
}

#[tokio::test]
async fn external_reference_links_local_checkout() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");

    let local = checkout(&rec, user, tier, None).await;
    assert!(local.id.is_local());

    rec.apply(
        &payment_event(
            "PAYMENT_RECEIVED",
            &fresh_id("pay"),
            Some(&fresh_id("evt")),
            json!({ "subscription": gid, "externalReference": local.id.as_str() }),
        ),
        ACTOR,
    )
    .await
    .unwrap();

    let row = subscription_row(&pool, local.id.as_str()).await;
    assert_eq!(row.status, "active");
    assert_eq!(row.gateway_subscription_id.as_deref(), Some(gid.as_str()));

    // Later subscription events find it by the linked gateway id.
    let deleted = rec
        .apply(&subscription_event("SUBSCRIPTION_DELETED", &gid, Some(&fresh_id("evt")), json!({})), ACTOR)
        .await
        .unwrap();
    assert_eq!(deleted, ProcessResult::Updated(local.id.to_string()));
}

#[tokio::test]
async fn activation_supersedes_previous_active_of_same_type() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;

    let old = rec
        .grant_manual(user, Uuid::now_v7(), tier, None, ACTOR)
        .await
        .unwrap();
    assert_eq!(old.status, SubscriptionStatus::Active);
    assert_eq!(entitlement(&pool, user).await.1.as_deref(), Some(old.id.as_str()));

    let gid = fresh_id("sub");
    checkout(&rec, user, tier, Some(&gid)).await;
    confirm(&rec, &fresh_id("pay"), &gid).await;

    let old_row = subscription_row(&pool, old.id.as_str()).await;
    assert_eq!(old_row.status, "cancelled");
    assert_eq!(old_row.status_reason.as_deref(), Some("superseded"));
    assert_eq!(count_audit(&pool, old.id.as_str(), "superseded").await, 1);

    assert_eq!(subscription_row(&pool, &gid).await.status, "active");
    assert_eq!(count_active(&pool, user).await, 1);
    assert_eq!(entitlement(&pool, user).await, (Some(tier), Some(gid)));
}

#[tokio::test]
async fn higher_privilege_wins_across_member_types() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let basic = member_type(&pool, 1).await;
    let premium = member_type(&pool, 50).await;

    let premium_sub = rec
        .grant_manual(user, Uuid::now_v7(), premium, None, ACTOR)
        .await
        .unwrap();
    rec.grant_manual(user, Uuid::now_v7(), basic, None, ACTOR)
        .await
        .unwrap();

    // Different member types coexist.
    assert_eq!(count_active(&pool, user).await, 2);
    assert_eq!(
        entitlement(&pool, user).await,
        (Some(premium), Some(premium_sub.id.to_string()))
    );
}

#[tokio::test]
async fn expiry_is_visible_on_read_and_materialized_on_reconcile() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;

    let sub = rec
        .grant_manual(
            user,
            Uuid::now_v7(),
            tier,
            Some(chrono::Utc::now() + chrono::Duration::days(30)),
            ACTOR,
        )
        .await
        .unwrap();
    sqlx::query("UPDATE subscriptions SET expires_at = now() - interval '1 minute' WHERE id = $1")
        .bind(sub.id.as_str())
        .execute(&pool)
        .await
        .unwrap();

    // No event arrived, yet the read shows it as expired.
    let read = rec.get_subscription(&sub.id).await.unwrap().unwrap();
    assert_eq!(read.status, SubscriptionStatus::Expired);
    assert_eq!(subscription_row(&pool, sub.id.as_str()).await.status, "active");
    let stored = rec.stored_entitlement(user).await.unwrap();
    assert_eq!(stored.subscription_id, Some(sub.id.clone()));

    let state = rec.current_entitlement(user, ACTOR).await.unwrap();
    assert!(!state.is_paid());

    let row = subscription_row(&pool, sub.id.as_str()).await;
    assert_eq!(row.status, "expired");
    assert_eq!(row.status_reason.as_deref(), Some("expired"));
    assert_eq!(count_audit(&pool, sub.id.as_str(), "expired").await, 1);
    assert_eq!(entitlement(&pool, user).await, (None, None));
}

#[tokio::test]
async fn sweeper_materializes_lapsed_subscriptions() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;

    let sub = rec
        .grant_manual(user, Uuid::now_v7(), tier, None, ACTOR)
        .await
        .unwrap();
    sqlx::query("UPDATE subscriptions SET expires_at = now() - interval '1 day' WHERE id = $1")
        .bind(sub.id.as_str())
        .execute(&pool)
        .await
        .unwrap();

    let swept = rec.sweep_expired(1000, "worker:expiry").await.unwrap();
    assert!(swept >= 1);
    assert_eq!(subscription_row(&pool, sub.id.as_str()).await.status, "expired");
    assert_eq!(entitlement(&pool, user).await, (None, None));
}

#[tokio::test]
async fn gateway_deletion_cancels_and_revokes() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");

    checkout(&rec, user, tier, Some(&gid)).await;
    confirm(&rec, &fresh_id("pay"), &gid).await;

    let result = rec
        .apply(&subscription_event("SUBSCRIPTION_DELETED", &gid, Some(&fresh_id("evt")), json!({})), ACTOR)
        .await
        .unwrap();
    assert_eq!(result, ProcessResult::Updated(gid.clone()));

    let row = subscription_row(&pool, &gid).await;
    assert_eq!(row.status, "cancelled");
    assert_eq!(row.status_reason.as_deref(), Some("gateway_deleted"));
    assert_eq!(entitlement(&pool, user).await, (None, None));
}

#[tokio::test]
async fn inactive_update_cancels_and_reactivation_is_refused() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");

    checkout(&rec, user, tier, Some(&gid)).await;
    confirm(&rec, &fresh_id("pay"), &gid).await;

    rec.apply(
        &subscription_event("SUBSCRIPTION_UPDATED", &gid, Some(&fresh_id("evt")), json!({ "status": "INACTIVE" })),
        ACTOR,
    )
    .await
    .unwrap();
    let row = subscription_row(&pool, &gid).await;
    assert_eq!(row.status, "cancelled");
    assert_eq!(row.status_reason.as_deref(), Some("gateway_inactive"));

    let revive = rec
        .apply(
            &subscription_event("SUBSCRIPTION_UPDATED", &gid, Some(&fresh_id("evt")), json!({ "status": "ACTIVE" })),
            ACTOR,
        )
        .await
        .unwrap();
    assert_eq!(revive, ProcessResult::Anomaly(gid.clone()));
    assert_eq!(subscription_row(&pool, &gid).await.status, "cancelled");
    assert_entitlement_consistent(&pool, user).await;
}

#[tokio::test]
async fn unknown_subscription_event_is_recorded_as_unlinked() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let gid = fresh_id("sub");
    let evt = fresh_id("evt");

    let event = subscription_event("SUBSCRIPTION_UPDATED", &gid, Some(&evt), json!({ "status": "ACTIVE" }));
    let first = rec.apply(&event, ACTOR).await.unwrap();
    let again = rec.apply(&event, ACTOR).await.unwrap();

    assert_eq!(first, ProcessResult::Unlinked(gid.clone()));
    assert_eq!(again, ProcessResult::Duplicate);
    assert_eq!(count_ledger(&pool, &gid).await, 1);

    let subs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE gateway_subscription_id = $1")
        .bind(&gid)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(subs, 0);
}

/// (version, status, status reason) of a subscription row.
async fn subscription_snapshot(pool: &sqlx::PgPool, id: &str) -> (i64, String, Option<String>) {
    sqlx::query_as("SELECT version, status, status_reason FROM subscriptions WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn audit_rows(pool: &sqlx::PgPool, entity_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE entity_id = $1")
        .bind(entity_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

// Without a gateway event id the ledger key derives from the subscription
// version. The first delivery bumps it, the second restates the status under
// the new version, the third hits the ledger.

#[tokio::test]
async fn redelivered_deletion_without_event_id_is_applied_once() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");

    checkout(&rec, user, tier, Some(&gid)).await;
    confirm(&rec, &fresh_id("pay"), &gid).await;
    assert_eq!(entitlement(&pool, user).await, (Some(tier), Some(gid.clone())));

    let event = subscription_event("SUBSCRIPTION_DELETED", &gid, None, json!({}));
    let first = rec.apply(&event, ACTOR).await.unwrap();
    let after_first = subscription_snapshot(&pool, &gid).await;
    let entitlement_after_first = entitlement(&pool, user).await;
    let audits = (audit_rows(&pool, &gid).await, audit_rows(&pool, &user.to_string()).await);

    let second = rec.apply(&event, ACTOR).await.unwrap();
    let third = rec.apply(&event, ACTOR).await.unwrap();

    assert_eq!(first, ProcessResult::Updated(gid.clone()));
    assert_eq!(second, ProcessResult::Unchanged(gid.clone()));
    assert_eq!(third, ProcessResult::Duplicate);

    assert_eq!(after_first.1, "cancelled");
    assert_eq!(after_first.2.as_deref(), Some("gateway_deleted"));
    assert_eq!(subscription_snapshot(&pool, &gid).await, after_first);
    assert_eq!(entitlement_after_first, (None, None));
    assert_eq!(entitlement(&pool, user).await, entitlement_after_first);
    assert_eq!(
        (audit_rows(&pool, &gid).await, audit_rows(&pool, &user.to_string()).await),
        audits
    );
    assert_eq!(count_ledger(&pool, &gid).await, 2);
}

#[tokio::test]
async fn redelivered_activation_without_event_id_is_applied_once() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");

    checkout(&rec, user, tier, Some(&gid)).await;

    let event = subscription_event("SUBSCRIPTION_UPDATED", &gid, None, json!({ "status": "ACTIVE" }));
    let first = rec.apply(&event, ACTOR).await.unwrap();
    let after_first = subscription_snapshot(&pool, &gid).await;
    let audits = (audit_rows(&pool, &gid).await, audit_rows(&pool, &user.to_string()).await);

    let second = rec.apply(&event, ACTOR).await.unwrap();
    let third = rec.apply(&event, ACTOR).await.unwrap();

    assert_eq!(first, ProcessResult::Updated(gid.clone()));
    assert_eq!(second, ProcessResult::Unchanged(gid.clone()));
    assert_eq!(third, ProcessResult::Duplicate);

    assert_eq!(after_first.1, "active");
    assert_eq!(subscription_snapshot(&pool, &gid).await, after_first);
    assert_eq!(entitlement(&pool, user).await, (Some(tier), Some(gid.clone())));
    assert_eq!(count_audit(&pool, &user.to_string(), "entitlement_changed").await, 1);
    assert_eq!(
        (audit_rows(&pool, &gid).await, audit_rows(&pool, &user.to_string()).await),
        audits
    );
    assert_eq!(count_ledger(&pool, &gid).await, 2);
    assert_entitlement_consistent(&pool, user).await;
}

#[tokio::test]
async fn refund_of_activating_payment_cancels_subscription() {
    let pool = setup_pool(DB).await;
    let rec = reconciler_with_policy(&pool, RefundPolicy::CancelSubscription);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");
    let pay = fresh_id("pay");

    checkout(&rec, user, tier, Some(&gid)).await;
    confirm(&rec, &pay, &gid).await;
    rec.apply(
        &payment_event("PAYMENT_REFUNDED", &pay, Some(&fresh_id("evt")), json!({ "subscription": gid })),
        ACTOR,
    )
    .await
    .unwrap();

    let row = subscription_row(&pool, &gid).await;
    assert_eq!(row.status, "cancelled");
    assert_eq!(row.status_reason.as_deref(), Some("refunded"));
    assert_eq!(entitlement(&pool, user).await, (None, None));
}

#[tokio::test]
async fn refund_of_renewal_payment_keeps_subscription() {
    let pool = setup_pool(DB).await;
    let rec = reconciler_with_policy(&pool, RefundPolicy::CancelSubscription);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");
    let renewal = fresh_id("pay");

    checkout(&rec, user, tier, Some(&gid)).await;
    confirm(&rec, &fresh_id("pay"), &gid).await;
    confirm(&rec, &renewal, &gid).await;
    rec.apply(
        &payment_event("PAYMENT_REFUNDED", &renewal, Some(&fresh_id("evt")), json!({ "subscription": gid })),
        ACTOR,
    )
    .await
    .unwrap();

    assert_eq!(payment_status(&pool, &renewal).await.as_deref(), Some("refunded"));
    assert_eq!(subscription_row(&pool, &gid).await.status, "active");
    assert_eq!(entitlement(&pool, user).await.1, Some(gid));
}

#[tokio::test]
async fn keep_policy_leaves_subscription_after_refund() {
    let pool = setup_pool(DB).await;
    let rec = reconciler_with_policy(&pool, RefundPolicy::KeepSubscription);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");
    let pay = fresh_id("pay");

    checkout(&rec, user, tier, Some(&gid)).await;
    confirm(&rec, &pay, &gid).await;
    rec.apply(
        &payment_event("PAYMENT_REFUNDED", &pay, Some(&fresh_id("evt")), json!({ "subscription": gid })),
        ACTOR,
    )
    .await
    .unwrap();

    assert_eq!(payment_status(&pool, &pay).await.as_deref(), Some("refunded"));
    assert_eq!(subscription_row(&pool, &gid).await.status, "active");
    assert_entitlement_consistent(&pool, user).await;
}

#[tokio::test]
async fn checkout_rejects_reused_gateway_id() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 10).await;
    let gid = fresh_id("sub");

    checkout(&rec, user, tier, Some(&gid)).await;

    let again = rec
        .open_checkout(
            &membership_sync::domain::subscription::NewSubscription {
                user_id: user,
                plan_id: Uuid::now_v7(),
                member_type_id: tier,
                gateway_subscription_id: Some(
                    membership_sync::domain::id::GatewaySubscriptionId::new(&gid).unwrap(),
                ),
                expires_at: None,
            },
            ACTOR,
        )
        .await;
    assert!(matches!(
        again,
        Err(membership_sync::domain::error::PipelineError::Validation(_))
    ));
}

#[tokio::test]
async fn get_subscription_of_unknown_id_is_none() {
    let pool = setup_pool(DB).await;
    let rec = reconciler(&pool);
    let missing = SubscriptionId::new(fresh_id("loc")).unwrap();
    assert!(rec.get_subscription(&missing).await.unwrap().is_none());
}
