use {
    super::reconcile::Reconciler,
    std::time::Duration,
    tokio::sync::watch,
};

const SWEEP_BATCH: i64 = 100;
const ACTOR: &str = "worker:expiry";

/// Periodically materialize expiry for users whose subscriptions lapsed
/// without anyone reading them.
pub async fn run_expiry_sweeper(
    reconciler: Reconciler,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(period_secs = period.as_secs(), "expiry sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("expiry sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(period) => {}
        }

        match reconciler.sweep_expired(SWEEP_BATCH, ACTOR).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(users = n, "expired lapsed subscriptions"),
            Err(e) => tracing::error!(error = %e, "expiry sweep error"),
        }
    }
}

/// Periodically drop ledger rows older than the gateway's retry horizon.
pub async fn run_ledger_pruner(
    reconciler: Reconciler,
    retention: chrono::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(retention_days = retention.num_days(), "ledger pruner started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("ledger pruner shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
        }

        match reconciler.prune_ledger(retention).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "pruned ledger rows"),
            Err(e) => tracing::error!(error = %e, "ledger prune error"),
        }
    }
}
