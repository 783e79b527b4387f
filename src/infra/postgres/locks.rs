use {crate::domain::error::PipelineError, std::time::Duration};

/// Bound every lock wait in this transaction. A lock that cannot be taken in
/// time fails with 55P03, which the pipeline treats as transient.
pub async fn set_lock_timeout(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    timeout: Duration,
) -> Result<(), PipelineError> {
    sqlx::query("SELECT set_config('lock_timeout', $1, true)")
        .bind(format!("{}ms", timeout.as_millis()))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Serialize all processing for `key` until the transaction ends.
/// Works even when the row doesn't exist yet, so there is no insert race.
pub async fn lock(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    key: &str,
) -> Result<(), PipelineError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
