//! Consent Engine
//!
//! One explicit instance wiring the identity registry, consent ledger,
//! access gate, crypto engine, provenance anchor and audit trail over a
//! shared storage backend. Domain modules call through here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditCheckpoint, AuditEntryType, AuditPage, AuditQuery, AuditTrail, ChainVerification};
use crate::config::loader::tier_policy_from_config;
use crate::config::AppConfig;
use crate::consent::{
    AccessDecision, AccessGate, ConsentGrant, ConsentLedger, DataModule, Revocation, Tier, TierPolicy,
};
use crate::crypto::{proof_digest, CryptoEngine, ZkProof};
use crate::error::ConsentError;
use crate::identity::{CitizenIdentity, Demographics, IdentityRegistry};
use crate::provenance::{
    backend_from_config, AnchorWorkers, LedgerBackend, ProofHandle, ProofState, ProvenanceAnchor,
    RetryPolicy,
};
use crate::storage::{keys, read_json, scan_json, write_json, Storage};

/// Who wants what, about whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub citizen_id: String,
    pub requester_id: String,
    pub module: DataModule,
    pub tier: Tier,
}

impl AccessRequest {
    pub fn new(citizen_id: &str, requester_id: &str, module: DataModule, tier: Tier) -> Self {
        Self {
            citizen_id: citizen_id.to_string(),
            requester_id: requester_id.to_string(),
            module,
            tier,
        }
    }
}

/// A domain record as persisted: every field sealed under `<module>/<field>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedRecord {
    pub record_id: String,
    pub citizen_id: String,
    pub module: DataModule,
    pub fields: BTreeMap<String, String>,
    pub written_by: String,
    pub written_at: DateTime<Utc>,
}

impl SealedRecord {
    /// Digest anchored to the ledger; computed over ciphertext only.
    pub fn record_hash(&self) -> Result<String, ConsentError> {
        Ok(proof_digest(&serde_json::to_vec(self)?))
    }
}

#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Denied(AccessDecision),
    Written {
        decision: AccessDecision,
        record_id: String,
        record_hash: String,
        proof: ProofHandle,
    },
}

#[derive(Debug, Clone)]
pub enum ReadOutcome {
    Denied(AccessDecision),
    Read {
        decision: AccessDecision,
        record_id: String,
        fields: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone)]
pub enum ProofOutcome {
    Denied(AccessDecision),
    Issued {
        decision: AccessDecision,
        proof: ZkProof,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub backend_id: String,
    pub synchronous_backend: bool,
    pub degraded_proofs: usize,
    pub total_proofs: usize,
}

/// Tunables that are not part of the storage or crypto setup.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub policy: TierPolicy,
    pub max_grant_days: i64,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            policy: TierPolicy::default(),
            max_grant_days: 365,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(5),
        }
    }
}

fn field_context(module: DataModule, field: &str) -> String {
    format!("{}/{}", module, field)
}

#[derive(Debug, Clone)]
pub struct ConsentEngine {
    storage: Arc<dyn Storage>,
    crypto: Arc<CryptoEngine>,
    identity: Arc<IdentityRegistry>,
    ledger: Arc<ConsentLedger>,
    gate: Arc<AccessGate>,
    anchor: ProvenanceAnchor,
    audit: Arc<AuditTrail>,
}

impl ConsentEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        crypto: CryptoEngine,
        backend: Arc<dyn LedgerBackend>,
        options: EngineOptions,
    ) -> Self {
        let crypto = Arc::new(crypto);
        let audit = Arc::new(AuditTrail::new(storage.clone()));
        let identity = Arc::new(IdentityRegistry::new(storage.clone(), crypto.clone()));
        let ledger = Arc::new(ConsentLedger::new(
            storage.clone(),
            audit.clone(),
            Arc::new(options.policy),
            options.max_grant_days,
        ));
        let gate = Arc::new(AccessGate::new(ledger.clone(), audit.clone()));
        let anchor = ProvenanceAnchor::new(storage.clone(), backend, options.retry, options.poll_interval)
            .with_audit(audit.clone());

        Self {
            storage,
            crypto,
            identity,
            ledger,
            gate,
            anchor,
            audit,
        }
    }

    pub fn from_config(config: &AppConfig, storage: Arc<dyn Storage>) -> Result<Self, ConsentError> {
        let crypto = CryptoEngine::new(&config.crypto)?;
        let options = EngineOptions {
            policy: tier_policy_from_config(&config.consent)?,
            max_grant_days: config.consent.max_grant_days,
            retry: RetryPolicy::from(&config.ledger.retry),
            poll_interval: Duration::from_millis(config.ledger.poll_interval_ms),
        };
        Ok(Self::new(storage, crypto, backend_from_config(&config.ledger), options))
    }

    pub async fn start_workers(&self) -> Result<AnchorWorkers, ConsentError> {
        self.anchor.start().await
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn crypto(&self) -> &CryptoEngine {
        &self.crypto
    }

    pub fn identity(&self) -> &IdentityRegistry {
        &self.identity
    }

    pub fn ledger(&self) -> &ConsentLedger {
        &self.ledger
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn anchor(&self) -> &ProvenanceAnchor {
        &self.anchor
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Register a citizen. New identities are anchored by a digest over
    /// their public identifiers.
    pub async fn register_citizen(
        &self,
        raw_id: &str,
        demographics: &Demographics,
        biometric: Option<&[u8]>,
    ) -> Result<CitizenIdentity, ConsentError> {
        let registration = self.identity.enroll(raw_id, demographics, biometric).await?;
        let identity = registration.identity;
        if registration.created {
            let digest = proof_digest(
                format!(
                    "identity|{}|{}|{}",
                    identity.citizen_id, identity.did, identity.uid_hash
                )
                .as_bytes(),
            );
            self.anchor.submit_proof(&digest, None).await?;
        }
        Ok(identity)
    }

    pub async fn grant_consent(
        &self,
        citizen_id: &str,
        requester_id: &str,
        requester_name: &str,
        modules: &[DataModule],
        duration_days: i64,
    ) -> Result<ConsentGrant, ConsentError> {
        self.identity.get(citizen_id).await?;
        let grant = self
            .ledger
            .grant(citizen_id, requester_id, requester_name, modules, duration_days)
            .await?;

        let digest = proof_digest(&serde_json::to_vec(&grant)?);
        let proof = self.anchor.submit_proof(&digest, Some(citizen_id)).await?;
        debug!("Grant {} anchored as proof {}", grant.grant_id, proof.proof_id);
        Ok(grant)
    }

    pub async fn revoke_consent(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: Option<DataModule>,
    ) -> Result<Revocation, ConsentError> {
        let revocation = self.ledger.revoke(citizen_id, requester_id, module).await?;

        let digest = proof_digest(&serde_json::to_vec(&revocation.revoked)?);
        let proof = self.anchor.submit_proof(&digest, Some(citizen_id)).await?;
        debug!("Revocation anchored as proof {}", proof.proof_id);
        Ok(revocation)
    }

    pub async fn check_access(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: DataModule,
        tier: Tier,
    ) -> Result<AccessDecision, ConsentError> {
        self.gate.check_access(citizen_id, requester_id, module, tier).await
    }

    /// Gate, seal, persist, anchor, audit. A denial writes nothing but the
    /// decision's audit entry.
    pub async fn protected_write(
        &self,
        request: &AccessRequest,
        fields: &BTreeMap<String, String>,
    ) -> Result<WriteOutcome, ConsentError> {
        if fields.is_empty() {
            return Err(ConsentError::ValidationError("A record needs at least one field".to_string()));
        }

        let decision = self
            .gate
            .check_access(&request.citizen_id, &request.requester_id, request.module, request.tier)
            .await?;
        if !decision.is_allowed() {
            return Ok(WriteOutcome::Denied(decision));
        }

        let mut sealed_fields = BTreeMap::new();
        for (name, value) in fields {
            let sealed = self
                .crypto
                .encrypt(value.as_bytes(), &field_context(request.module, name))?;
            sealed_fields.insert(name.clone(), sealed);
        }

        let record = SealedRecord {
            record_id: Uuid::new_v4().to_string(),
            citizen_id: request.citizen_id.clone(),
            module: request.module,
            fields: sealed_fields,
            written_by: request.requester_id.clone(),
            written_at: Utc::now(),
        };
        write_json(
            self.storage.as_ref(),
            &keys::record(request.module.as_str(), &record.citizen_id, &record.record_id),
            &record,
        )
        .await?;

        let record_hash = record.record_hash()?;
        let proof = self
            .anchor
            .submit_proof(&record_hash, Some(&request.citizen_id))
            .await?;

        self.audit
            .append(
                &request.citizen_id,
                AuditEntryType::RecordWritten,
                &request.requester_id,
                json!({
                    "record_id": record.record_id,
                    "module": request.module,
                    "fields": fields.keys().collect::<Vec<_>>(),
                    "record_hash": record_hash,
                    "proof_id": proof.proof_id,
                    "proof_state": proof.state,
                }),
            )
            .await?;

        info!(
            "Record {} written to {} for {} by {}",
            record.record_id, request.module, request.citizen_id, request.requester_id
        );
        Ok(WriteOutcome::Written {
            decision,
            record_id: record.record_id,
            record_hash,
            proof,
        })
    }

    pub async fn protected_read(
        &self,
        request: &AccessRequest,
        record_id: &str,
    ) -> Result<ReadOutcome, ConsentError> {
        let decision = self
            .gate
            .check_access(&request.citizen_id, &request.requester_id, request.module, request.tier)
            .await?;
        if !decision.is_allowed() {
            return Ok(ReadOutcome::Denied(decision));
        }

        let record: SealedRecord = read_json(
            self.storage.as_ref(),
            &keys::record(request.module.as_str(), &request.citizen_id, record_id),
        )
        .await?
        .ok_or_else(|| {
            ConsentError::NotFound(format!("{} record {} for {}", request.module, record_id, request.citizen_id))
        })?;

        let mut fields = BTreeMap::new();
        for (name, sealed) in &record.fields {
            let plaintext = self
                .crypto
                .decrypt_to_string(sealed, &field_context(request.module, name))?;
            fields.insert(name.clone(), plaintext);
        }

        self.audit
            .append(
                &request.citizen_id,
                AuditEntryType::RecordRead,
                &request.requester_id,
                json!({
                    "record_id": record_id,
                    "module": request.module,
                    "fields": record.fields.keys().collect::<Vec<_>>(),
                }),
            )
            .await?;

        Ok(ReadOutcome::Read {
            decision,
            record_id: record_id.to_string(),
            fields,
        })
    }

    /// The proof-stub path. The stub commits to the sealed records of the
    /// module, never to plaintext.
    pub async fn request_proof(
        &self,
        request: &AccessRequest,
        claim: &str,
    ) -> Result<ProofOutcome, ConsentError> {
        if claim.trim().is_empty() {
            return Err(ConsentError::ValidationError("Proof claim is required".to_string()));
        }

        let decision = self
            .gate
            .check_proof_access(&request.citizen_id, &request.requester_id, request.module, request.tier)
            .await?;
        if !decision.is_allowed() {
            return Ok(ProofOutcome::Denied(decision));
        }

        let records: Vec<SealedRecord> = scan_json(
            self.storage.as_ref(),
            &keys::records_of(request.module.as_str(), &request.citizen_id),
        )
        .await?;
        let mut committed = Vec::new();
        for record in &records {
            committed.extend_from_slice(record.record_hash()?.as_bytes());
        }

        let proof = self.crypto.zk_proof_stub(claim, &committed);
        info!(
            "Issued {} proof stub for claim '{}' to {}",
            proof.proof_system, claim, request.requester_id
        );
        Ok(ProofOutcome::Issued { decision, proof })
    }

    pub async fn audit_query(&self, citizen_id: &str, filter: &AuditQuery) -> Result<AuditPage, ConsentError> {
        self.audit.query(citizen_id, filter).await
    }

    pub async fn audit_verify(&self, citizen_id: &str) -> Result<ChainVerification, ConsentError> {
        self.audit.verify(citizen_id).await
    }

    /// Anchor the Merkle root of a citizen's audit chain and note it in the chain.
    pub async fn anchor_audit_checkpoint(
        &self,
        citizen_id: &str,
    ) -> Result<(AuditCheckpoint, ProofHandle), ConsentError> {
        let checkpoint = self.audit.checkpoint(citizen_id).await?;
        let proof = self
            .anchor
            .submit_proof(&checkpoint.merkle_root, Some(citizen_id))
            .await?;

        self.audit
            .append(
                citizen_id,
                AuditEntryType::ProofSubmitted,
                "provenance-anchor",
                json!({
                    "merkle_root": checkpoint.merkle_root,
                    "head_sequence": checkpoint.head_sequence,
                    "proof_id": proof.proof_id,
                    "backend_id": proof.backend_id,
                }),
            )
            .await?;

        info!(
            "Anchored audit checkpoint for {} at sequence {}",
            citizen_id, checkpoint.head_sequence
        );
        Ok((checkpoint, proof))
    }

    pub async fn status(&self) -> Result<EngineStatus, ConsentError> {
        let backend = self.anchor.backend().await;
        let proofs = self.anchor.proofs().await?;
        Ok(EngineStatus {
            backend_id: backend.backend_id().to_string(),
            synchronous_backend: backend.is_synchronous(),
            degraded_proofs: proofs
                .iter()
                .filter(|p| p.state == ProofState::Degraded)
                .count(),
            total_proofs: proofs.len(),
        })
    }
}
