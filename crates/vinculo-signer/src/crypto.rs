//! Credential encryption.
//!
//! AES-256-GCM with HKDF per-organization key derivation. Used for the
//! PKCS#12 password at rest; the stored layout is nonce || ciphertext || tag.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;

use vinculo_core::OrgId;

use crate::error::{SignatureError, SignatureResult};

/// Length of AES-256 key in bytes.
const KEY_LENGTH: usize = 32;

/// Length of GCM nonce in bytes.
const NONCE_LENGTH: usize = 12;

/// Length of GCM authentication tag in bytes.
const TAG_LENGTH: usize = 16;

/// Context string for HKDF key derivation.
const HKDF_INFO: &[u8] = b"vinculo-signer-credentials-v1";

/// Service for encrypting and decrypting certificate credentials.
///
/// Uses AES-256-GCM with HKDF-derived per-organization keys.
#[derive(Clone)]
pub struct CredentialEncryption {
    /// Master key for deriving organization-specific keys.
    master_key: [u8; KEY_LENGTH],
}

impl CredentialEncryption {
    /// Create a new encryption service with the given master key.
    #[must_use]
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Self {
        Self { master_key }
    }

    /// Create a new encryption service from a hex-encoded master key.
    pub fn from_hex(hex_key: &str) -> SignatureResult<Self> {
        let bytes = hex::decode(hex_key).map_err(|e| SignatureError::Encryption {
            message: format!("invalid hex key: {e}"),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Create a new encryption service from a base64-encoded master key.
    pub fn from_base64(base64_key: &str) -> SignatureResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let bytes = STANDARD
            .decode(base64_key)
            .map_err(|e| SignatureError::Encryption {
                message: format!("invalid base64 key: {e}"),
            })?;
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> SignatureResult<Self> {
        if bytes.len() != KEY_LENGTH {
            return Err(SignatureError::Encryption {
                message: format!("key must be {} bytes, got {}", KEY_LENGTH, bytes.len()),
            });
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self::new(key))
    }

    /// Derive an organization-specific key using HKDF.
    fn derive_org_key(&self, org_id: OrgId) -> [u8; KEY_LENGTH] {
        let hkdf = Hkdf::<Sha256>::new(Some(org_id.as_uuid().as_bytes()), &self.master_key);
        let mut derived_key = [0u8; KEY_LENGTH];
        // 32 bytes is always a valid HKDF-SHA256 output length.
        hkdf.expand(HKDF_INFO, &mut derived_key)
            .expect("HKDF-SHA256 supports 32-byte output");
        derived_key
    }

    /// Encrypt a credential for a specific organization.
    ///
    /// Returns nonce || ciphertext || tag.
    pub fn encrypt(&self, org_id: OrgId, plaintext: &[u8]) -> SignatureResult<Vec<u8>> {
        let key = self.derive_org_key(org_id);
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| SignatureError::Encryption {
                message: format!("failed to create cipher: {e}"),
            })?;

        use rand::rngs::OsRng;
        use rand::RngCore;
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SignatureError::Encryption {
                message: format!("encryption failed: {e}"),
            })?;

        let mut output = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    /// Decrypt a credential for a specific organization.
    pub fn decrypt(&self, org_id: OrgId, data: &[u8]) -> SignatureResult<Vec<u8>> {
        if data.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(SignatureError::Decryption {
                message: format!("ciphertext too short: {} bytes", data.len()),
            });
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LENGTH);
        let key = self.derive_org_key(org_id);
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| SignatureError::Decryption {
                message: format!("failed to create cipher: {e}"),
            })?;

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SignatureError::Decryption {
                message: "authentication failed".to_string(),
            })
    }
}
