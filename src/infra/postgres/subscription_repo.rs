use {
    crate::domain::error::PipelineError,
    crate::domain::id::{GatewaySubscriptionId, PaymentId, SubscriptionId},
    crate::domain::subscription::{SubscriptionRecord, SubscriptionStatus},
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

const COLUMNS: &str = "id, user_id, plan_id, member_type_id, status, status_reason, \
                       gateway_subscription_id, activated_by_payment_id, started_at, expires_at, \
                       version, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: String,
    user_id: Uuid,
    plan_id: Uuid,
    member_type_id: Uuid,
    status: String,
    status_reason: Option<String>,
    gateway_subscription_id: Option<String>,
    activated_by_payment_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = PipelineError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: SubscriptionId::new(row.id)?,
            user_id: row.user_id,
            plan_id: row.plan_id,
            member_type_id: row.member_type_id,
            status: SubscriptionStatus::try_from(row.status.as_str())?,
            status_reason: row.status_reason,
            gateway_subscription_id: row
                .gateway_subscription_id
                .map(GatewaySubscriptionId::new)
                .transpose()?,
            activated_by_payment_id: row.activated_by_payment_id.map(PaymentId::new).transpose()?,
            started_at: row.started_at,
            expires_at: row.expires_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_records(rows: Vec<SubscriptionRow>) -> Result<Vec<SubscriptionRecord>, PipelineError> {
    rows.into_iter().map(SubscriptionRecord::try_from).collect()
}

pub async fn find<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: &SubscriptionId,
) -> Result<Option<SubscriptionRecord>, PipelineError> {
    let row: Option<SubscriptionRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM subscriptions WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(executor)
            .await?;

    row.map(SubscriptionRecord::try_from).transpose()
}

pub async fn find_by_gateway_id<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    gateway_id: &GatewaySubscriptionId,
) -> Result<Option<SubscriptionRecord>, PipelineError> {
    let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM subscriptions WHERE gateway_subscription_id = $1"
    ))
    .bind(gateway_id.as_str())
    .fetch_optional(executor)
    .await?;

    row.map(SubscriptionRecord::try_from).transpose()
}

/// Re-read a subscription under the caller's user lock.
pub async fn find_for_update(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &SubscriptionId,
) -> Result<Option<SubscriptionRecord>, PipelineError> {
    let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM subscriptions WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.as_str())
    .fetch_optional(&mut **tx)
    .await?;

    row.map(SubscriptionRecord::try_from).transpose()
}

pub struct InsertSubscription<'a> {
    pub id: &'a SubscriptionId,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub member_type_id: Uuid,
    pub status: SubscriptionStatus,
    pub gateway_subscription_id: Option<&'a GatewaySubscriptionId>,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    sub: &InsertSubscription<'_>,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO subscriptions
            (id, user_id, plan_id, member_type_id, status,
             gateway_subscription_id, started_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(sub.id.as_str())
    .bind(sub.user_id)
    .bind(sub.plan_id)
    .bind(sub.member_type_id)
    .bind(sub.status.as_str())
    .bind(sub.gateway_subscription_id.map(GatewaySubscriptionId::as_str))
    .bind(sub.started_at)
    .bind(sub.expires_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Move a subscription to `status` and bump its version. Activation stamps
/// `started_at` once and records the payment that paid for it.
pub async fn update_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &SubscriptionId,
    status: SubscriptionStatus,
    reason: Option<&str>,
    activated_by: Option<&PaymentId>,
) -> Result<i64, PipelineError> {
    let version: i64 = sqlx::query_scalar(
        r#"
        UPDATE subscriptions
        SET status = $1,
            status_reason = $2,
            started_at = CASE WHEN $1 = 'active' THEN COALESCE(started_at, now()) ELSE started_at END,
            activated_by_payment_id = CASE WHEN $1 = 'active' THEN $3 ELSE activated_by_payment_id END,
            version = version + 1,
            updated_at = now()
        WHERE id = $4
        RETURNING version
        "#,
    )
    .bind(status.as_str())
    .bind(reason)
    .bind(activated_by.map(PaymentId::as_str))
    .bind(id.as_str())
    .fetch_one(&mut **tx)
    .await?;

    Ok(version)
}

/// Attach the gateway id to a locally opened subscription on first sight.
pub async fn link_gateway_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &SubscriptionId,
    gateway_id: &GatewaySubscriptionId,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        UPDATE subscriptions
        SET gateway_subscription_id = $1, updated_at = now()
        WHERE id = $2 AND gateway_subscription_id IS NULL
        "#,
    )
    .bind(gateway_id.as_str())
    .bind(id.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Other active subscriptions of the same (user, member type).
pub async fn list_active_for_pair(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    member_type_id: Uuid,
    except: &SubscriptionId,
) -> Result<Vec<SubscriptionRecord>, PipelineError> {
    let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
        r#"
        SELECT {COLUMNS} FROM subscriptions
        WHERE user_id = $1 AND member_type_id = $2 AND status = 'active' AND id <> $3
        ORDER BY id
        FOR UPDATE
        "#
    ))
    .bind(user_id)
    .bind(member_type_id)
    .bind(except.as_str())
    .fetch_all(&mut **tx)
    .await?;

    into_records(rows)
}

/// Mark every live subscription of `user_id` whose expiry has passed as
/// expired. Returns the ids that changed.
pub async fn expire_lapsed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<SubscriptionId>, PipelineError> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        UPDATE subscriptions
        SET status = 'expired', status_reason = 'expired',
            version = version + 1, updated_at = now()
        WHERE user_id = $1
          AND status IN ('pending', 'active')
          AND expires_at IS NOT NULL
          AND expires_at <= $2
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_all(&mut **tx)
    .await?;

    ids.into_iter().map(SubscriptionId::new).collect()
}

/// Users holding at least one live subscription past its expiry.
pub async fn users_with_lapsed(
    pool: &sqlx::PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Uuid>, PipelineError> {
    let users: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT user_id FROM subscriptions
        WHERE status IN ('pending', 'active')
          AND expires_at IS NOT NULL
          AND expires_at <= $1
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(users)
}
