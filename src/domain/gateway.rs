use {
    super::error::PipelineError,
    super::id::PaymentId,
    serde::Serialize,
    std::{future::Future, pin::Pin},
};

/// Pix QR data for a pending payment, as the client-facing surface sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PixQrCode {
    /// Copy-and-paste Pix payload.
    pub qr_payload: String,
    /// Base64 PNG ready for an `<img>` tag.
    pub renderable_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Query calls to the payment gateway. The credential lives behind this seam
/// and is never handed to callers.
pub trait PaymentGateway: Send + Sync {
    fn fetch_pix_qr_code(
        &self,
        id: &PaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<PixQrCode, PipelineError>> + Send + '_>>;
}
