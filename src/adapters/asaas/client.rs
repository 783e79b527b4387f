use {
    crate::domain::{
        error::PipelineError,
        gateway::{PaymentGateway, PixQrCode},
        id::PaymentId,
    },
    secrecy::{ExposeSecret, SecretString},
    serde::Deserialize,
    std::{future::Future, pin::Pin, time::Duration},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PixQrCodeResponse {
    encoded_image: String,
    payload: String,
    expiration_date: Option<String>,
}

/// Outbound query client. Holds the API key; nothing it returns carries it.
pub struct AsaasClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl AsaasClient {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Gateway(format!("http client init failed: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }
}

impl PaymentGateway for AsaasClient {
    fn fetch_pix_qr_code(
        &self,
        id: &PaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<PixQrCode, PipelineError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move { self.fetch_pix_qr_code_inner(&id).await })
    }
}

impl AsaasClient {
    async fn fetch_pix_qr_code_inner(&self, id: &PaymentId) -> Result<PixQrCode, PipelineError> {
        let url = format!("{}/payments/{}/pixQrCode", self.base_url, id);

        let response = self
            .http
            .get(&url)
            .header("access_token", self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| PipelineError::Gateway(format!("request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PipelineError::GatewayNotFound);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(payment_id = %id, %status, body = %error_text, "pix qr code request failed");
            return Err(PipelineError::Gateway(format!("gateway returned {status}")));
        }

        let body: PixQrCodeResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Gateway(format!("failed to parse response: {e}")))?;

        Ok(PixQrCode {
            qr_payload: body.payload,
            renderable_image: body.encoded_image,
            expires_at: body.expiration_date,
        })
    }
}
