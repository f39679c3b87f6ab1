//! Authenticated symmetric encryption for secret env values
//!
//! AES-256-GCM with the key derived as SHA-256 of the master secret. The
//! stored blob is base64 of `iv(12) || tag(16) || ciphertext`. A missing
//! master key is non-fatal until the first encrypt/decrypt call.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};

use crate::errors::DeployError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Codec for secret env values
#[derive(Clone)]
pub struct SecretsCodec {
    key: Option<[u8; 32]>,
}

impl SecretsCodec {
    /// Derive the codec key from a master secret, if one is configured.
    pub fn new(master_key: Option<&str>) -> Self {
        let key = master_key
            .filter(|s| !s.is_empty())
            .map(|s| Sha256::digest(s.as_bytes()).into());
        Self { key }
    }

    /// Read the master secret from `SECRETS_MASTER_KEY`.
    pub fn from_env() -> Self {
        let master = std::env::var("SECRETS_MASTER_KEY").ok();
        Self::new(master.as_deref())
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    fn cipher(&self) -> Result<Aes256Gcm, DeployError> {
        let key = self.key.as_ref().ok_or_else(|| {
            DeployError::ConfigIncomplete("SECRETS_MASTER_KEY is not set".to_string())
        })?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
    }

    /// Encrypt a UTF-8 plaintext into a storable blob.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, DeployError> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        // aes-gcm appends the tag to the ciphertext; the stored layout wants
        // it up front, right after the nonce.
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| DeployError::SecretDecrypt("encryption failed".to_string()))?;
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(tag);
        blob.extend_from_slice(body);

        Ok(BASE64.encode(blob))
    }

    /// Decrypt a stored blob back into its UTF-8 plaintext.
    pub fn decrypt(&self, blob: &str) -> Result<String, DeployError> {
        let key = self.key.as_ref().ok_or_else(|| {
            DeployError::SecretDecrypt("SECRETS_MASTER_KEY is not set".to_string())
        })?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        let raw = BASE64
            .decode(blob)
            .map_err(|e| DeployError::SecretDecrypt(format!("invalid base64: {e}")))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(DeployError::SecretDecrypt("blob too short".to_string()));
        }

        let (nonce, rest) = raw.split_at(NONCE_LEN);
        let (tag, body) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(rest.len());
        sealed.extend_from_slice(body);
        sealed.extend_from_slice(tag);

        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed.as_slice())
            .map_err(|_| DeployError::SecretDecrypt("authentication failed".to_string()))?;

        String::from_utf8(plain)
            .map_err(|_| DeployError::SecretDecrypt("plaintext is not UTF-8".to_string()))
    }
}
