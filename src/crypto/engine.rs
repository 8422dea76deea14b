use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::zk::{self, ZkProof};
use super::proof_digest;
use crate::config::CryptoConfig;
use crate::error::ConsentError;

const ENVELOPE_PREFIX: &str = "v1.";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const BIOMETRIC_SALT_LEN: usize = 16;
const BIOMETRIC_OUTPUT_LEN: usize = 32;
const FIELD_KEY_DOMAIN: &[u8] = b"consent-gate/field-key/v1";
const UID_DOMAIN: &[u8] = b"consent-gate/uid/v1";

/// Digest family selector. Each purpose maps to a distinct primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashPurpose {
    /// Peppered SHA-256: fast and deterministic for equality lookup.
    Uid,
    /// Argon2id with a fresh salt: slow, resists offline brute force.
    Biometric,
    /// Plain SHA-256: collision resistant and recomputable by anyone.
    Proof,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDigest {
    pub purpose: HashPurpose,
    pub value: String,
    /// Hex salt, present only for salted purposes.
    pub salt: Option<String>,
}

pub struct CryptoEngine {
    master_key: [u8; 32],
    uid_pepper: Vec<u8>,
    biometric_params: Params,
}

impl fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("master_key", &"<redacted>")
            .field("biometric_params", &self.biometric_params)
            .finish()
    }
}

impl CryptoEngine {
    pub fn new(config: &CryptoConfig) -> Result<Self, ConsentError> {
        let master_key = config.master_key()?;
        if config.uid_pepper.is_empty() {
            return Err(ConsentError::ConfigError("UID pepper must not be empty".to_string()));
        }
        let biometric_params = Params::new(
            config.biometric_memory_kib,
            config.biometric_iterations,
            1,
            Some(BIOMETRIC_OUTPUT_LEN),
        )
        .map_err(|e| ConsentError::ConfigError(format!("Invalid Argon2 parameters: {}", e)))?;

        Ok(Self {
            master_key,
            uid_pepper: config.uid_pepper.as_bytes().to_vec(),
            biometric_params,
        })
    }

    /// Per-context key; the master key itself never encrypts anything.
    fn field_key(&self, field_context: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(FIELD_KEY_DOMAIN);
        hasher.update((field_context.len() as u64).to_be_bytes());
        hasher.update(field_context.as_bytes());
        hasher.update(self.master_key);
        hasher.finalize().into()
    }

    fn cipher_for(&self, field_context: &str) -> Result<Aes256Gcm, ConsentError> {
        if field_context.trim().is_empty() {
            return Err(ConsentError::ValidationError(
                "Field context must not be empty".to_string(),
            ));
        }
        Aes256Gcm::new_from_slice(&self.field_key(field_context))
            .map_err(|e| ConsentError::CryptoError(format!("Invalid field key: {}", e)))
    }

    /// Authenticated encryption bound to `field_context`.
    pub fn encrypt(&self, plaintext: &[u8], field_context: &str) -> Result<String, ConsentError> {
        let cipher = self.cipher_for(field_context)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: field_context.as_bytes(),
                },
            )
            .map_err(|_| ConsentError::CryptoError("Encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", ENVELOPE_PREFIX, BASE64.encode(sealed)))
    }

    pub fn decrypt(&self, sealed: &str, field_context: &str) -> Result<Vec<u8>, ConsentError> {
        let cipher = self.cipher_for(field_context)?;
        let encoded = sealed.strip_prefix(ENVELOPE_PREFIX).ok_or_else(|| {
            ConsentError::DecryptionFailure("Unsupported ciphertext envelope".to_string())
        })?;
        let raw = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| ConsentError::DecryptionFailure(format!("Malformed ciphertext: {}", e)))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(ConsentError::DecryptionFailure(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: field_context.as_bytes(),
                },
            )
            .map_err(|_| {
                debug!("Authentication tag check failed for context {}", field_context);
                ConsentError::DecryptionFailure(format!(
                    "Authentication failed for field context '{}'",
                    field_context
                ))
            })
    }

    pub fn decrypt_to_string(&self, sealed: &str, field_context: &str) -> Result<String, ConsentError> {
        let plaintext = self.decrypt(sealed, field_context)?;
        String::from_utf8(plaintext)
            .map_err(|_| ConsentError::DecryptionFailure("Plaintext is not UTF-8".to_string()))
    }

    pub fn encrypt_json<T: Serialize>(&self, value: &T, field_context: &str) -> Result<String, ConsentError> {
        let plaintext = serde_json::to_vec(value)?;
        self.encrypt(&plaintext, field_context)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, sealed: &str, field_context: &str) -> Result<T, ConsentError> {
        let plaintext = self.decrypt(sealed, field_context)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| ConsentError::DecryptionFailure(format!("Decrypted payload is not valid JSON: {}", e)))
    }

    pub fn hash(&self, data: &[u8], purpose: HashPurpose) -> Result<FieldDigest, ConsentError> {
        match purpose {
            HashPurpose::Uid => Ok(FieldDigest {
                purpose,
                value: self.uid_digest(data),
                salt: None,
            }),
            HashPurpose::Biometric => {
                let mut salt = [0u8; BIOMETRIC_SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                Ok(FieldDigest {
                    purpose,
                    value: self.biometric_digest(data, &salt)?,
                    salt: Some(hex::encode(salt)),
                })
            }
            HashPurpose::Proof => Ok(FieldDigest {
                purpose,
                value: proof_digest(data),
                salt: None,
            }),
        }
    }

    pub fn hash_uid(&self, uid: &str) -> String {
        self.uid_digest(uid.as_bytes())
    }

    fn uid_digest(&self, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(UID_DOMAIN);
        hasher.update((self.uid_pepper.len() as u64).to_be_bytes());
        hasher.update(&self.uid_pepper);
        hasher.update(data);
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    fn biometric_digest(&self, data: &[u8], salt: &[u8]) -> Result<String, ConsentError> {
        if data.is_empty() {
            return Err(ConsentError::ValidationError(
                "Biometric template must not be empty".to_string(),
            ));
        }
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.biometric_params.clone());
        let mut output = [0u8; BIOMETRIC_OUTPUT_LEN];
        argon
            .hash_password_into(data, salt, &mut output)
            .map_err(|e| ConsentError::CryptoError(format!("Biometric hashing failed: {}", e)))?;
        Ok(format!("argon2id:{}", hex::encode(output)))
    }

    /// Recompute the slow digest of a live sample and compare it to the stored one.
    pub fn verify_biometric(
        &self,
        sample: &[u8],
        salt_hex: &str,
        stored_hash: &str,
    ) -> Result<bool, ConsentError> {
        let salt = hex::decode(salt_hex)
            .map_err(|e| ConsentError::CryptoError(format!("Invalid biometric salt: {}", e)))?;
        let computed = self.biometric_digest(sample, &salt)?;
        Ok(bool::from(computed.as_bytes().ct_eq(stored_hash.as_bytes())))
    }

    /// Placeholder proof; see [`zk`] for why it carries no soundness.
    pub fn zk_proof_stub(&self, claim: &str, private_data: &[u8]) -> ZkProof {
        zk::generate(claim, private_data)
    }
}
