use {
    crate::domain::error::PipelineError,
    crate::domain::event::InboundEvent,
    chrono::{DateTime, Utc},
};

/// Record an event key in the ledger, with the gateway's own timestamp next
/// to our arrival time.
/// Returns `true` if inserted, `false` if the key was already applied.
pub async fn record(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_key: &str,
    event: &InboundEvent,
) -> Result<bool, PipelineError> {
    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO provider_events
            (event_key, entity_kind, entity_id, event_type, occurred_at, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (event_key) DO NOTHING
        RETURNING true
        "#,
    )
    .bind(event_key)
    .bind(event.entity_kind().to_string())
    .bind(event.entity_id())
    .bind(event.event_type.to_string())
    .bind(event.occurred_at)
    .bind(&event.raw)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(inserted.is_some())
}

pub async fn set_outcome(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_key: &str,
    outcome: &str,
) -> Result<(), PipelineError> {
    sqlx::query("UPDATE provider_events SET outcome = $1 WHERE event_key = $2")
        .bind(outcome)
        .bind(event_key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Delete ledger rows applied before `cutoff`. Returns how many were removed.
pub async fn prune(pool: &sqlx::PgPool, cutoff: DateTime<Utc>) -> Result<u64, PipelineError> {
    let result = sqlx::query("DELETE FROM provider_events WHERE applied_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
