use {
    crate::{
        AppState,
        domain::{error::PipelineError, gateway::PixQrCode, id::PaymentId},
    },
    axum::{
        Json,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::Serialize,
};

#[derive(Serialize)]
struct QrEnvelope<'a> {
    success: bool,
    #[serde(flatten)]
    qr: &'a PixQrCode,
}

/// Client-facing proxy for the Pix QR code of a pending payment. Answers
/// `{success: true, qrPayload, renderableImage, expiresAt?}` or
/// `{success: false, error}`.
#[tracing::instrument(name = "pix_qr_code", skip(state))]
pub async fn pix_qr_code_handler(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Response {
    let id = match PaymentId::new(payment_id) {
        Ok(id) => id,
        Err(e) => return failure(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    };

    match state.reconciler.get_payment(&id).await {
        Ok(Some(payment)) if !payment.is_awaiting_funds() => {
            return failure(
                StatusCode::CONFLICT,
                format!("payment is {}, no QR code available", payment.status),
            );
        }
        Ok(_) => {}
        Err(e) => return failure_from(e),
    }

    match state.gateway.fetch_pix_qr_code(&id).await {
        Ok(qr) => (
            StatusCode::OK,
            Json(QrEnvelope {
                success: true,
                qr: &qr,
            }),
        )
            .into_response(),
        Err(e) => failure_from(e),
    }
}

fn failure_from(err: PipelineError) -> Response {
    match err {
        PipelineError::GatewayNotFound => failure(StatusCode::NOT_FOUND, "payment not found"),
        PipelineError::Gateway(msg) => {
            tracing::error!("gateway error: {msg}");
            failure(StatusCode::BAD_GATEWAY, "payment gateway unavailable")
        }
        err if err.is_transient() => {
            tracing::error!("transient store failure: {err}");
            failure(StatusCode::SERVICE_UNAVAILABLE, "temporarily unavailable")
        }
        err => {
            tracing::error!("internal error: {err}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": error.into() })),
    )
        .into_response()
}
