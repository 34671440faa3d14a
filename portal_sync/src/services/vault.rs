//! Credential vault — AES-256-GCM encryption of stored cloud credentials.
//!
//! Stored layout is `nonce || ciphertext || tag`. The secret id is bound as
//! associated data, so a ciphertext copied onto another row fails to decrypt.

use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::models::secret::{CloudCredential, StoredSecret};
use crate::store::SecretStore;

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; KEY_LENGTH],
}

impl CredentialCipher {
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    pub fn from_base64(encoded: &str) -> PortalResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| PortalError::Crypto(format!("invalid base64 vault key: {e}")))?;
        if bytes.len() != KEY_LENGTH {
            return Err(PortalError::Crypto(format!(
                "vault key must be {KEY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        Ok(Self::new(key))
    }

    fn cipher(&self) -> PortalResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| PortalError::Crypto(format!("failed to create cipher: {e}")))
    }

    pub fn encrypt(&self, secret_id: Uuid, plaintext: &[u8]) -> PortalResult<Vec<u8>> {
        let cipher = self.cipher()?;
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: secret_id.as_bytes(),
                },
            )
            .map_err(|e| PortalError::Crypto(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, secret_id: Uuid, encrypted: &[u8]) -> PortalResult<Vec<u8>> {
        if encrypted.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(PortalError::Crypto("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LENGTH);
        self.cipher()?
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: secret_id.as_bytes(),
                },
            )
            .map_err(|_| PortalError::Crypto("decryption failed".into()))
    }
}

#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Decrypted credential for `secret_id`, or
    /// [`PortalError::CredentialNotFound`] if no such secret exists.
    async fn get_decrypted_credential(&self, secret_id: Uuid) -> PortalResult<CloudCredential>;
}

pub struct SecretVault {
    secrets: Arc<dyn SecretStore>,
    cipher: Option<CredentialCipher>,
}

impl SecretVault {
    /// A vault without a cipher can look secrets up but never decrypt them.
    pub fn new(secrets: Arc<dyn SecretStore>, cipher: Option<CredentialCipher>) -> Self {
        Self { secrets, cipher }
    }

    fn require_cipher(&self) -> PortalResult<&CredentialCipher> {
        self.cipher
            .as_ref()
            .ok_or_else(|| PortalError::Crypto("vault key not configured".into()))
    }

    /// Encrypt and persist a credential under a fresh secret id.
    pub async fn store_credential(
        &self,
        name: &str,
        provider: &str,
        credential: &CloudCredential,
    ) -> PortalResult<StoredSecret> {
        let cipher = self.require_cipher()?;
        let id = Uuid::new_v4();
        let plaintext = serde_json::to_vec(credential)
            .map_err(|e| PortalError::Crypto(format!("credential encoding: {e}")))?;
        let encrypted_value = cipher.encrypt(id, &plaintext)?;

        let stored = self
            .secrets
            .insert_secret(StoredSecret {
                id,
                name: name.to_string(),
                provider: provider.to_string(),
                encrypted_value,
                created_at: Utc::now(),
            })
            .await?;
        tracing::info!(secret_id = %stored.id, name = %stored.name, "Stored credential");
        Ok(stored)
    }
}

#[async_trait]
impl CredentialVault for SecretVault {
    async fn get_decrypted_credential(&self, secret_id: Uuid) -> PortalResult<CloudCredential> {
        let secret = self
            .secrets
            .find_secret(secret_id)
            .await?
            .ok_or_else(|| PortalError::CredentialNotFound(secret_id.to_string()))?;

        let plaintext = self
            .require_cipher()?
            .decrypt(secret.id, &secret.encrypted_value)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| PortalError::Crypto(format!("stored credential is malformed: {e}")))
    }
}
