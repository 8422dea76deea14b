//! Identity Registry
//!
//! Maps a raw national ID to a stable opaque citizen id. The raw ID and any
//! biometric template are reduced to one-way digests on entry and never stored.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::{CryptoEngine, HashPurpose};
use crate::error::ConsentError;
use crate::locks::KeyedLocks;
use crate::storage::{keys, read_json, write_json, Storage};

pub const DID_METHOD: &str = "did:cgate";
const DEMOGRAPHICS_CONTEXT: &str = "identity/demographics";

static NATIONAL_ID_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[0-9]{12}$"));

/// Strip whitespace and require exactly twelve ASCII digits.
pub fn normalize_national_id(raw_id: &str) -> Result<String, ConsentError> {
    let normalized: String = raw_id.chars().filter(|c| !c.is_whitespace()).collect();
    let pattern = NATIONAL_ID_PATTERN
        .as_ref()
        .map_err(|e| ConsentError::ConfigError(format!("Invalid national ID pattern: {}", e)))?;
    if !pattern.is_match(&normalized) {
        return Err(ConsentError::ValidationError(
            "National ID must be 12 digits".to_string(),
        ));
    }
    Ok(normalized)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographics {
    pub full_name: String,
    pub date_of_birth: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Demographics {
    pub fn new(full_name: impl Into<String>, date_of_birth: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            date_of_birth: date_of_birth.into(),
            gender: None,
            address: None,
        }
    }

    fn validate(&self) -> Result<(), ConsentError> {
        if self.full_name.trim().is_empty() {
            return Err(ConsentError::ValidationError("Full name is required".to_string()));
        }
        if self.date_of_birth.trim().is_empty() {
            return Err(ConsentError::ValidationError("Date of birth is required".to_string()));
        }
        Ok(())
    }

    /// Whitespace-trimmed, case-folded rendering used for comparison.
    fn canonical(&self) -> String {
        let fold = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        format!(
            "name:{}|dob:{}|gender:{}|address:{}",
            fold(&self.full_name),
            fold(&self.date_of_birth),
            self.gender.as_deref().map(fold).unwrap_or_default(),
            self.address.as_deref().map(fold).unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitizenIdentity {
    pub citizen_id: String,
    pub uid_hash: String,
    pub did: String,
    pub demographics_hash: String,
    /// Demographics sealed under the identity context.
    pub demographics_sealed: String,
    pub biometric_hash: Option<String>,
    pub biometric_salt: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CitizenIdentity {
    pub fn has_biometric(&self) -> bool {
        self.biometric_hash.is_some()
    }
}

/// Outcome of a registration; `created` is false for an idempotent resubmission.
#[derive(Debug, Clone)]
pub struct Registration {
    pub identity: CitizenIdentity,
    pub created: bool,
}

/// DID derived from the uid hash, so the same person always gets the same DID.
pub fn derive_did(uid_hash: &str) -> String {
    let digest = hex::encode(Sha256::digest(uid_hash.as_bytes()));
    format!("{}:{}", DID_METHOD, &digest[..32])
}

#[derive(Debug)]
pub struct IdentityRegistry {
    storage: Arc<dyn Storage>,
    crypto: Arc<CryptoEngine>,
    locks: KeyedLocks,
}

impl IdentityRegistry {
    pub fn new(storage: Arc<dyn Storage>, crypto: Arc<CryptoEngine>) -> Self {
        Self {
            storage,
            crypto,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn register(
        &self,
        raw_id: &str,
        demographics: &Demographics,
        biometric: Option<&[u8]>,
    ) -> Result<CitizenIdentity, ConsentError> {
        Ok(self.enroll(raw_id, demographics, biometric).await?.identity)
    }

    pub async fn enroll(
        &self,
        raw_id: &str,
        demographics: &Demographics,
        biometric: Option<&[u8]>,
    ) -> Result<Registration, ConsentError> {
        let national_id = normalize_national_id(raw_id)?;
        demographics.validate()?;

        let uid_hash = self.crypto.hash_uid(&national_id);
        let demographics_hash = self
            .crypto
            .hash(demographics.canonical().as_bytes(), HashPurpose::Uid)?
            .value;

        let _guard = self.locks.lock(&uid_hash).await;

        if let Some(existing) = self.lookup(&uid_hash).await? {
            return Ok(Registration {
                identity: self.confirm_resubmission(existing, &demographics_hash, biometric)?,
                created: false,
            });
        }

        let (biometric_hash, biometric_salt) = match biometric {
            Some(sample) => {
                let digest = self.crypto.hash(sample, HashPurpose::Biometric)?;
                (Some(digest.value), digest.salt)
            }
            None => (None, None),
        };

        let identity = CitizenIdentity {
            citizen_id: Uuid::new_v4().to_string(),
            did: derive_did(&uid_hash),
            demographics_sealed: self.crypto.encrypt_json(demographics, DEMOGRAPHICS_CONTEXT)?,
            uid_hash,
            demographics_hash,
            biometric_hash,
            biometric_salt,
            created_at: Utc::now(),
        };

        write_json(self.storage.as_ref(), &keys::citizen(&identity.citizen_id), &identity).await?;
        // The uid index is written last; a citizen is registered once it exists.
        write_json(
            self.storage.as_ref(),
            &keys::identity(&identity.uid_hash),
            &identity.citizen_id,
        )
        .await?;

        info!("Registered citizen {} ({})", identity.citizen_id, identity.did);
        Ok(Registration {
            identity,
            created: true,
        })
    }

    fn confirm_resubmission(
        &self,
        existing: CitizenIdentity,
        demographics_hash: &str,
        biometric: Option<&[u8]>,
    ) -> Result<CitizenIdentity, ConsentError> {
        if existing.demographics_hash != demographics_hash {
            warn!("Re-registration of {} with conflicting demographics", existing.citizen_id);
            return Err(ConsentError::DuplicateIdentity(format!(
                "National ID already registered as {} with different demographics",
                existing.citizen_id
            )));
        }

        let biometric_matches = match (biometric, &existing.biometric_hash, &existing.biometric_salt) {
            (None, None, _) => true,
            (Some(sample), Some(stored), Some(salt)) => {
                self.crypto.verify_biometric(sample, salt, stored)?
            }
            _ => false,
        };
        if !biometric_matches {
            warn!("Re-registration of {} with a different biometric", existing.citizen_id);
            return Err(ConsentError::DuplicateIdentity(format!(
                "National ID already registered as {} with a different biometric",
                existing.citizen_id
            )));
        }

        debug!("Idempotent re-registration of {}", existing.citizen_id);
        Ok(existing)
    }

    async fn lookup(&self, uid_hash: &str) -> Result<Option<CitizenIdentity>, ConsentError> {
        let citizen_id: Option<String> =
            read_json(self.storage.as_ref(), &keys::identity(uid_hash)).await?;
        match citizen_id {
            Some(id) => Ok(Some(self.get(&id).await?)),
            None => Ok(None),
        }
    }

    pub async fn resolve(&self, raw_id: &str) -> Result<String, ConsentError> {
        let national_id = normalize_national_id(raw_id)?;
        let uid_hash = self.crypto.hash_uid(&national_id);
        read_json(self.storage.as_ref(), &keys::identity(&uid_hash))
            .await?
            .ok_or_else(|| ConsentError::NotFound("No citizen registered for that national ID".to_string()))
    }

    pub async fn get(&self, citizen_id: &str) -> Result<CitizenIdentity, ConsentError> {
        read_json(self.storage.as_ref(), &keys::citizen(citizen_id))
            .await?
            .ok_or_else(|| ConsentError::NotFound(format!("Citizen {}", citizen_id)))
    }

    pub async fn demographics(&self, citizen_id: &str) -> Result<Demographics, ConsentError> {
        let identity = self.get(citizen_id).await?;
        self.crypto
            .decrypt_json(&identity.demographics_sealed, DEMOGRAPHICS_CONTEXT)
    }

    /// Check a live sample against the enrolled template.
    pub async fn verify_biometric(&self, citizen_id: &str, sample: &[u8]) -> Result<bool, ConsentError> {
        let identity = self.get(citizen_id).await?;
        match (&identity.biometric_hash, &identity.biometric_salt) {
            (Some(stored), Some(salt)) => {
                let matched = self.crypto.verify_biometric(sample, salt, stored)?;
                if !matched {
                    warn!("Biometric mismatch for citizen {}", citizen_id);
                }
                Ok(matched)
            }
            _ => Err(ConsentError::NotFound(format!(
                "No biometric enrolled for citizen {}",
                citizen_id
            ))),
        }
    }
}
