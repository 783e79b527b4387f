use {
    crate::domain::entitlement::{Candidate, EntitlementState},
    crate::domain::error::PipelineError,
    crate::domain::id::SubscriptionId,
    crate::domain::subscription::SubscriptionStatus,
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: String,
    member_type_id: Uuid,
    privilege: i32,
    status: String,
    started_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

/// Every subscription of the user that could still grant something.
pub async fn candidates(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<Vec<Candidate>, PipelineError> {
    let rows: Vec<CandidateRow> = sqlx::query_as(
        r#"
        SELECT s.id, s.member_type_id, m.privilege, s.status, s.started_at, s.expires_at
        FROM subscriptions s
        JOIN member_types m ON m.id = s.member_type_id
        WHERE s.user_id = $1 AND s.status IN ('pending', 'active')
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut **tx)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(Candidate {
                subscription_id: SubscriptionId::new(row.id)?,
                member_type_id: row.member_type_id,
                privilege: row.privilege,
                status: SubscriptionStatus::try_from(row.status.as_str())?,
                started_at: row.started_at,
                expires_at: row.expires_at,
            })
        })
        .collect()
}

/// Stored entitlement. A user with no row holds the baseline.
pub async fn get<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    user_id: Uuid,
) -> Result<EntitlementState, PipelineError> {
    let row: Option<(Option<Uuid>, Option<String>)> = sqlx::query_as(
        "SELECT member_type_id, subscription_id FROM entitlements WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some((member_type_id, subscription_id)) => Ok(EntitlementState {
            user_id,
            member_type_id,
            subscription_id: subscription_id.map(SubscriptionId::new).transpose()?,
        }),
        None => Ok(EntitlementState::baseline(user_id)),
    }
}

pub async fn upsert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    state: &EntitlementState,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO entitlements (user_id, member_type_id, subscription_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO UPDATE
        SET member_type_id = EXCLUDED.member_type_id,
            subscription_id = EXCLUDED.subscription_id,
            updated_at = now()
        "#,
    )
    .bind(state.user_id)
    .bind(state.member_type_id)
    .bind(state.subscription_id.as_ref().map(SubscriptionId::as_str))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Register a member type. Returns its id.
pub async fn insert_member_type(
    pool: &sqlx::PgPool,
    name: &str,
    privilege: i32,
) -> Result<Uuid, PipelineError> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO member_types (id, name, privilege)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE SET privilege = EXCLUDED.privilege
        RETURNING id
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .bind(privilege)
    .fetch_one(pool)
    .await?;

    Ok(id)
}
