use {
    crate::domain::error::PipelineError,
    axum::http::HeaderMap,
    secrecy::{ExposeSecret, SecretString},
    sha2::{Digest, Sha256},
    subtle::ConstantTimeEq,
};

pub const TOKEN_HEADER: &str = "asaas-access-token";

/// Checks that a webhook call carries the shared token configured at the
/// gateway. Pure: no I/O, no side effects.
pub struct Authenticator {
    expected: [u8; 32],
}

impl Authenticator {
    pub fn new(token: &SecretString) -> Self {
        Self {
            expected: Sha256::digest(token.expose_secret().as_bytes()).into(),
        }
    }

    /// Accepts `asaas-access-token: <token>` or `Authorization: Bearer <token>`.
    /// Both sides are hashed first, so the comparison runs over equal-length
    /// digests and leaks neither content nor length.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<(), PipelineError> {
        let supplied = presented_token(headers)
            .ok_or_else(|| PipelineError::Unauthorized("missing webhook token".into()))?;

        let digest: [u8; 32] = Sha256::digest(supplied.as_bytes()).into();
        if bool::from(digest[..].ct_eq(&self.expected[..])) {
            Ok(())
        } else {
            Err(PipelineError::Unauthorized("webhook token mismatch".into()))
        }
    }
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(token.trim());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Authenticator { .. }")
    }
}
