use {
    membership_sync::{
        AppState,
        adapters::asaas::{AsaasClient, Authenticator},
        config::AppConfig,
        infra::crypto::SecretSealer,
        router,
        services::{
            reconcile::{Reconciler, ReconcilerSettings},
            worker,
        },
    },
    secrecy::ExposeSecret,
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        environment = ?config.environment,
        gateway = %config.gateway_base_url,
        refund_policy = config.refund_policy.as_str(),
        "configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(config.database_url.expose_secret())
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let sealer = Arc::new(SecretSealer::new(&config.field_encryption_key)?);
    let reconciler = Reconciler::new(
        pool,
        sealer,
        ReconcilerSettings {
            refund_policy: config.refund_policy,
            store_timeout: config.store_timeout,
            lock_timeout: config.lock_timeout,
        },
    );

    let state = AppState {
        reconciler: reconciler.clone(),
        authenticator: Arc::new(Authenticator::new(&config.webhook_token)),
        gateway: Arc::new(AsaasClient::new(
            config.gateway_base_url.clone(),
            config.api_key,
        )?),
        request_deadline: config.request_deadline,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    if let Some(period) = config.expiry_sweep {
        tasks.push(tokio::spawn(worker::run_expiry_sweeper(
            reconciler.clone(),
            period,
            shutdown_rx.clone(),
        )));
    }
    tasks.push(tokio::spawn(worker::run_ledger_pruner(
        reconciler,
        config.ledger_retention,
        shutdown_rx,
    )));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("listening on {}", config.listen_addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
