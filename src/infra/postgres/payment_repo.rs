use {
    crate::domain::error::PipelineError,
    crate::domain::id::{PaymentId, SubscriptionId},
    crate::domain::money::{BillingMethod, Currency, Money, MoneyAmount},
    crate::domain::payment::{NewPayment, PaymentRecord, PaymentStatus},
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

const COLUMNS: &str = "id, user_id, subscription_id, amount, currency, method, status, \
                       status_before_delete, last_event_type, version, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: String,
    user_id: Option<Uuid>,
    subscription_id: Option<String>,
    amount: i64,
    currency: String,
    method: String,
    status: String,
    status_before_delete: Option<String>,
    last_event_type: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = PipelineError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PaymentId::new(row.id)?,
            user_id: row.user_id,
            subscription_id: row.subscription_id.map(SubscriptionId::new).transpose()?,
            money: Money::new(
                MoneyAmount::new(row.amount)?,
                Currency::try_from(row.currency.as_str())?,
            ),
            method: BillingMethod::try_from(row.method.as_str())?,
            status: PaymentStatus::try_from(row.status.as_str())?,
            status_before_delete: row
                .status_before_delete
                .as_deref()
                .map(PaymentStatus::try_from)
                .transpose()?,
            last_event_type: row.last_event_type,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn find<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: &PaymentId,
) -> Result<Option<PaymentRecord>, PipelineError> {
    let row: Option<PaymentRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM payments WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(executor)
            .await?;

    row.map(PaymentRecord::try_from).transpose()
}

pub async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment: &NewPayment,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO payments
            (id, user_id, subscription_id, amount, currency, method, status,
             status_before_delete, card_token_sealed, last_event_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(payment.id.as_str())
    .bind(payment.user_id)
    .bind(payment.subscription_id.as_ref().map(SubscriptionId::as_str))
    .bind(payment.money.amount().cents())
    .bind(payment.money.currency().as_str())
    .bind(payment.method.as_str())
    .bind(payment.status.as_str())
    .bind(payment.status_before_delete.map(|s| s.as_str()))
    .bind(payment.card_token_sealed.as_deref())
    .bind(&payment.last_event_type)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Move a payment to `status` and bump its version.
pub async fn update_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &PaymentId,
    status: PaymentStatus,
    status_before_delete: Option<PaymentStatus>,
    last_event_type: &str,
) -> Result<i64, PipelineError> {
    let version: i64 = sqlx::query_scalar(
        r#"
        UPDATE payments
        SET status = $1, status_before_delete = $2, last_event_type = $3,
            version = version + 1, updated_at = now()
        WHERE id = $4
        RETURNING version
        "#,
    )
    .bind(status.as_str())
    .bind(status_before_delete.map(|s| s.as_str()))
    .bind(last_event_type)
    .bind(id.as_str())
    .fetch_one(&mut **tx)
    .await?;

    Ok(version)
}

/// Fill in the owning subscription and user if the payment does not have
/// them yet. An existing link is never overwritten.
pub async fn link_subscription(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &PaymentId,
    subscription_id: &SubscriptionId,
    user_id: Uuid,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        UPDATE payments
        SET subscription_id = COALESCE(subscription_id, $1),
            user_id = COALESCE(user_id, $2)
        WHERE id = $3
        "#,
    )
    .bind(subscription_id.as_str())
    .bind(user_id)
    .bind(id.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Sealed card token, if one was stored.
pub async fn sealed_card_token<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: &PaymentId,
) -> Result<Option<String>, PipelineError> {
    let token: Option<Option<String>> =
        sqlx::query_scalar("SELECT card_token_sealed FROM payments WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(executor)
            .await?;

    Ok(token.flatten())
}

/// Store a sealed card token learned from a later event. Keeps the first one.
pub async fn attach_card_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &PaymentId,
    sealed: &str,
) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE payments SET card_token_sealed = COALESCE(card_token_sealed, $1) WHERE id = $2",
    )
    .bind(sealed)
    .bind(id.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
