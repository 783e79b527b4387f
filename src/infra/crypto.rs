use {
    crate::domain::error::PipelineError,
    chacha20poly1305::{
        XChaCha20Poly1305, XNonce,
        aead::{Aead, AeadCore, KeyInit, OsRng},
    },
    secrecy::{ExposeSecret, SecretString},
    sha2::{Digest, Sha256},
};

const NONCE_LEN: usize = 24;

/// Seals secret fields (card tokens) before they are written to the store.
///
/// XChaCha20-Poly1305 with the key derived as SHA-256 of the configured
/// passphrase. Output is hex of `nonce || ciphertext`.
pub struct SecretSealer {
    cipher: XChaCha20Poly1305,
}

impl SecretSealer {
    pub fn new(passphrase: &SecretString) -> Result<Self, PipelineError> {
        let key: [u8; 32] = Sha256::digest(passphrase.expose_secret().as_bytes()).into();
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| PipelineError::Crypto(format!("cipher init failed: {e}")))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &SecretString) -> Result<String, PipelineError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.expose_secret().as_bytes())
            .map_err(|e| PipelineError::Crypto(format!("encryption failed: {e}")))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<SecretString, PipelineError> {
        let raw = hex::decode(sealed)
            .map_err(|e| PipelineError::Crypto(format!("invalid hex data: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(PipelineError::Crypto("ciphertext too short".into()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|e| PipelineError::Crypto(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|e| PipelineError::Crypto(format!("invalid utf-8 plaintext: {e}")))
    }
}

impl std::fmt::Debug for SecretSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretSealer { .. }")
    }
}
