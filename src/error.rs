use thiserror::Error;

impl From<serde_json::Error> for ConsentError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for ConsentError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageError(format!("Database error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum ConsentError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Conflicting grant: {0}")]
    ConflictingGrant(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(String),

    #[error("Decryption failure: {0}")]
    DecryptionFailure(String),

    #[error("Proof submission failed: {0}")]
    ProofSubmissionFailed(String),

    #[error("Audit chain for citizen {citizen_id} broken at sequence {sequence}")]
    AuditIntegrityViolation { citizen_id: String, sequence: u64 },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),
}

impl ConsentError {
    pub fn conflicting_grant(citizen_id: &str, requester_id: &str, module: &str) -> Self {
        Self::ConflictingGrant(format!(
            "requester {} already holds an active grant on '{}' for citizen {}; revoke it first",
            requester_id, module, citizen_id
        ))
    }

    pub fn grant_duration_exceeded(days: i64, max: i64) -> Self {
        Self::ValidationError(format!(
            "Grant duration of {} days exceeds the maximum of {} days",
            days, max
        ))
    }
}
