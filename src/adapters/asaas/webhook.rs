use {
    super::normalize::normalize,
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{error::PipelineError, event::ProcessResult},
    },
    axum::{Json, body::Bytes, extract::State, http::HeaderMap},
};

pub const ACTOR: &str = "webhook:asaas";

/// Gateway-facing endpoint. Answers 200 for anything authenticated that was
/// applied, duplicated, stale or unusable; only store trouble becomes a 5xx,
/// which the gateway retries.
#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(
        event_type = tracing::field::Empty,
        entity_id = tracing::field::Empty,
        event_id = tracing::field::Empty,
    )
)]
pub async fn asaas_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.authenticator.authenticate(&headers)?;

    let event = match normalize(&body) {
        Ok(event) => event,
        Err(PipelineError::Malformed(msg)) => {
            tracing::warn!(error = %msg, "unusable webhook payload, dropped");
            return Ok(acknowledge("ignored"));
        }
        Err(e) => return Err(e.into()),
    };

    let span = tracing::Span::current();
    span.record("event_type", tracing::field::display(event.event_type));
    span.record("entity_id", event.entity_id());
    if let Some(id) = &event.event_id {
        span.record("event_id", id.as_str());
    }

    let applied = tokio::time::timeout(state.request_deadline, state.reconciler.apply(&event, ACTOR))
        .await
        .unwrap_or(Err(PipelineError::StoreTimeout(state.request_deadline)));

    settle(applied)
}

/// Store failures reach the gateway as 5xx. Anything else a retry cannot fix
/// is logged and acknowledged.
fn settle(
    applied: Result<ProcessResult, PipelineError>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match applied {
        Ok(result) => {
            log_result(&result);
            Ok(acknowledge(result.as_str()))
        }
        Err(PipelineError::Malformed(msg)) => {
            tracing::warn!(error = %msg, "event dropped");
            Ok(acknowledge("ignored"))
        }
        Err(e @ (PipelineError::Validation(_) | PipelineError::Crypto(_))) => {
            tracing::error!(error = %e, "event could not be applied, dropped");
            Ok(acknowledge("ignored"))
        }
        Err(e) => Err(e.into()),
    }
}

fn acknowledge(status: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "received": true, "status": status }))
}

fn log_result(result: &ProcessResult) {
    match result {
        ProcessResult::Duplicate => tracing::info!("duplicate event, already applied"),
        ProcessResult::Anomaly(id) => tracing::warn!(entity_id = %id, "event recorded as anomaly"),
        other => tracing::info!(outcome = other.as_str(), "event processed"),
    }
}
