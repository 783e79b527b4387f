mod common;

use common::*;
use uuid::Uuid;

const DB: &str = "membership_sync_test_store";

async fn insert_payment(
    pool: &sqlx::PgPool,
    id: &str,
    amount: i64,
    status: &str,
    shadow: Option<&str>,
) -> Result<sqlx::postgres::PgQueryResult, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payments
            (id, amount, currency, method, status, status_before_delete, last_event_type)
        VALUES ($1, $2, 'brl', 'pix', $3, $4, 'TEST')
        "#,
    )
    .bind(id)
    .bind(amount)
    .bind(status)
    .bind(shadow)
    .execute(pool)
    .await
}

fn assert_violates(result: Result<sqlx::postgres::PgQueryResult, sqlx::Error>, constraint: &str) {
    let err = result.expect_err("insert should be rejected").to_string();
    assert!(
        err.contains(constraint),
        "expected {constraint} violation, got: {err}"
    );
}

#[tokio::test]
async fn rejects_unknown_payment_status() {
    let pool = setup_pool(DB).await;
    let result = insert_payment(&pool, &fresh_id("pay"), 1000, "chargeback", None).await;
    assert_violates(result, "chk_payments_status");
}

#[tokio::test]
async fn rejects_negative_amount() {
    let pool = setup_pool(DB).await;
    let result = insert_payment(&pool, &fresh_id("pay"), -100, "created", None).await;
    assert_violates(result, "chk_payments_amount");
}

#[tokio::test]
async fn shadow_is_required_exactly_while_deleted() {
    let pool = setup_pool(DB).await;

    let deleted_without = insert_payment(&pool, &fresh_id("pay"), 1000, "deleted", None).await;
    assert_violates(deleted_without, "chk_payments_shadow");

    let live_with = insert_payment(&pool, &fresh_id("pay"), 1000, "received", Some("created")).await;
    assert_violates(live_with, "chk_payments_shadow");

    insert_payment(&pool, &fresh_id("pay"), 1000, "deleted", Some("received"))
        .await
        .expect("deleted with shadow is valid");
}

#[tokio::test]
async fn second_active_for_same_member_type_is_rejected() {
    let pool = setup_pool(DB).await;
    let user = Uuid::now_v7();
    let tier = member_type(&pool, 1).await;

    let insert = |id: String| {
        let pool = pool.clone();
        async move {
            sqlx::query(
                r#"
                INSERT INTO subscriptions (id, user_id, plan_id, member_type_id, status)
                VALUES ($1, $2, $3, $4, 'active')
                "#,
            )
            .bind(id)
            .bind(user)
            .bind(Uuid::now_v7())
            .bind(tier)
            .execute(&pool)
            .await
        }
    };

    insert(fresh_id("loc")).await.expect("first active is valid");
    assert_violates(insert(fresh_id("loc")).await, "subscriptions_one_active");
}

#[tokio::test]
async fn entitlement_needs_both_member_type_and_subscription() {
    let pool = setup_pool(DB).await;
    let tier = member_type(&pool, 1).await;

    let result = sqlx::query(
        "INSERT INTO entitlements (user_id, member_type_id, subscription_id) VALUES ($1, $2, NULL)",
    )
    .bind(Uuid::now_v7())
    .bind(tier)
    .execute(&pool)
    .await;

    assert_violates(result, "chk_entitlements_pair");
}
