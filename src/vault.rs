//! Credential vault. Encrypts/decrypts per-tenant upstream credentials
//! at rest using AES-256-GCM keyed by a process-wide secret.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, ScrapeError};

const NONCE_LEN: usize = 12;

/// Decrypted upstream credentials. `Debug`/`Display` redact the password so it can
/// never leak into a log line, panic message, or `SyncResult.error` string.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    /// Callers must avoid logging this string.
    pub fn expose_password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials {{ username: {}, password: <redacted> }}", self.username)
    }
}

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// `key_b64` must decode to exactly 32 bytes. Anything else is a
    /// `ConfigurationError` — the process was started with a malformed vault key.
    pub fn new(key_b64: &str) -> Result<Self> {
        let key_bytes = STANDARD.decode(key_b64).map_err(|e| {
            ScrapeError::Configuration(format!("VAULT_ENCRYPTION_KEY is not valid base64: {e}"))
        })?;
        if key_bytes.len() != 32 {
            return Err(ScrapeError::Configuration(format!(
                "VAULT_ENCRYPTION_KEY must decode to 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    /// Encrypts credentials into an opaque base64 blob: `nonce || ciphertext`.
    pub fn encrypt(&self, credentials: &Credentials) -> Result<String> {
        let plaintext = serde_json::to_vec(credentials)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| ScrapeError::Configuration(format!("failed to encrypt credentials: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypts an opaque blob back into credentials. Fails with `DecryptionError`
    /// on ciphertext mismatch or tampering — never panics, never partially succeeds.
    pub fn decrypt(&self, blob: &str) -> Result<Credentials> {
        let raw = STANDARD
            .decode(blob)
            .map_err(|e| ScrapeError::Decryption(format!("credential blob is not valid base64: {e}")))?;

        if raw.len() < NONCE_LEN {
            return Err(ScrapeError::Decryption("credential blob is too short to contain a nonce".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ScrapeError::Decryption("ciphertext failed authentication — tampered or wrong key".into()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| ScrapeError::Decryption(format!("decrypted payload was not valid credentials: {e}")))
    }
}
