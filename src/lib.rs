pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {
    adapters::asaas::Authenticator,
    axum::{
        Router,
        extract::DefaultBodyLimit,
        routing::{get, post},
    },
    domain::gateway::PaymentGateway,
    services::reconcile::Reconciler,
    std::{sync::Arc, time::Duration},
    tower_http::{timeout::TimeoutLayer, trace::TraceLayer},
};

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
    pub authenticator: Arc<Authenticator>,
    pub gateway: Arc<dyn PaymentGateway>,
    /// Whole-request budget, shorter than the gateway's retry timeout.
    pub request_deadline: Duration,
}

pub fn router(state: AppState) -> Router {
    let client_routes = Router::new()
        .route(
            "/payments/{payment_id}/pix-qr-code",
            get(adapters::pix_qr::pix_qr_code_handler),
        )
        .layer(TimeoutLayer::new(state.request_deadline));

    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/webhook/asaas",
            post(adapters::asaas::asaas_webhook_handler),
        )
        .merge(client_routes)
        .layer(DefaultBodyLimit::max(64 * 1024)) // 64 KB, gateway events are a few KB
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
