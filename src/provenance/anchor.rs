//! Provenance Anchor
//!
//! Tracks every proof submitted to the configured ledger backend.
//! Synchronous backends are written inline. For asynchronous backends the
//! proof record is persisted as `Queued` and handed to a submission worker,
//! and a poller later moves submitted proofs to `Confirmed` or `Failed`.
//! Ledger trouble never fails the caller: exhausted retries leave the record
//! `Degraded` for operators to retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backend::{LedgerBackend, ProofStatus};
use super::retry::RetryPolicy;
use crate::audit::{AuditEntryType, AuditTrail};
use crate::error::ConsentError;
use crate::locks::KeyedLocks;
use crate::storage::{keys, read_json, scan_json, write_json, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofState {
    /// Durably enqueued, not yet accepted by the backend.
    Queued,
    /// Accepted by the backend, awaiting confirmation.
    Pending,
    Confirmed,
    /// The backend reported the transaction as failed.
    Failed,
    /// Retries exhausted; needs operator remediation.
    Degraded,
    /// Submitted to a backend that is no longer configured.
    Orphaned,
}

impl ProofState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofState::Queued => "queued",
            ProofState::Pending => "pending",
            ProofState::Confirmed => "confirmed",
            ProofState::Failed => "failed",
            ProofState::Degraded => "degraded",
            ProofState::Orphaned => "orphaned",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, ProofState::Queued | ProofState::Pending)
    }
}

impl fmt::Display for ProofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub proof_id: String,
    pub record_hash: String,
    pub backend_id: String,
    pub proof_handle: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub confirmed: bool,
    pub state: ProofState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub citizen_id: Option<String>,
}

impl ProofRecord {
    /// Collapsed view: anything not yet settled reads as pending.
    pub fn status(&self) -> ProofStatus {
        match self.state {
            ProofState::Confirmed => ProofStatus::Confirmed,
            ProofState::Failed | ProofState::Orphaned => ProofStatus::Failed,
            ProofState::Queued | ProofState::Pending | ProofState::Degraded => ProofStatus::Pending,
        }
    }

    pub fn handle(&self) -> ProofHandle {
        ProofHandle {
            proof_id: self.proof_id.clone(),
            backend_id: self.backend_id.clone(),
            record_hash: self.record_hash.clone(),
            state: self.state,
            confirmed: self.confirmed,
        }
    }
}

/// What `submit_proof` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofHandle {
    pub proof_id: String,
    pub backend_id: String,
    pub record_hash: String,
    pub state: ProofState,
    pub confirmed: bool,
}

/// Background tasks driving asynchronous backends.
#[derive(Debug)]
pub struct AnchorWorkers {
    submitter: JoinHandle<()>,
    poller: JoinHandle<()>,
}

impl AnchorWorkers {
    pub fn shutdown(self) {
        self.submitter.abort();
        self.poller.abort();
    }
}

#[derive(Debug)]
struct AnchorState {
    storage: Arc<dyn Storage>,
    backend: RwLock<Arc<dyn LedgerBackend>>,
    retry: RetryPolicy,
    poll_interval: Duration,
    audit: Option<Arc<AuditTrail>>,
    locks: KeyedLocks,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

#[derive(Debug, Clone)]
pub struct ProvenanceAnchor {
    state: Arc<AnchorState>,
}

impl ProvenanceAnchor {
    pub fn new(
        storage: Arc<dyn Storage>,
        backend: Arc<dyn LedgerBackend>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(AnchorState {
                storage,
                backend: RwLock::new(backend),
                retry,
                poll_interval,
                audit: None,
                locks: KeyedLocks::new(),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
            }),
        }
    }

    /// Record degraded proofs that belong to a citizen in that citizen's trail.
    /// Must be called before the anchor is cloned or started.
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.audit = Some(audit);
        } else {
            warn!("Anchor already shared; audit trail not attached");
        }
        self
    }

    pub async fn backend(&self) -> Arc<dyn LedgerBackend> {
        self.state.backend.read().await.clone()
    }

    pub async fn backend_id(&self) -> String {
        self.backend().await.backend_id().to_string()
    }

    /// Spawn the submission worker and the confirmation poller. Records left
    /// `Queued` by a previous process are re-enqueued first.
    pub async fn start(&self) -> Result<AnchorWorkers, ConsentError> {
        let mut queue_rx = self
            .state
            .queue_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ConsentError::ConfigError("Provenance workers already started".to_string()))?;

        let recovered = self.requeue_where(|r| r.state == ProofState::Queued).await?;
        if recovered > 0 {
            info!("Re-enqueued {} queued proof(s) from storage", recovered);
        }

        let worker = self.clone();
        let submitter = tokio::spawn(async move {
            while let Some(proof_id) = queue_rx.recv().await {
                if let Err(e) = worker.process_submission(&proof_id).await {
                    error!("Failed to process proof {}: {}", proof_id, e);
                }
            }
            debug!("Proof submission queue closed");
        });

        let poller_anchor = self.clone();
        let poll_interval = self.state.poll_interval;
        let poller = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                if let Err(e) = poller_anchor.poll_pending().await {
                    error!("Proof confirmation poll failed: {}", e);
                }
            }
        });

        info!("Provenance workers started (poll every {:?})", poll_interval);
        Ok(AnchorWorkers { submitter, poller })
    }

    async fn load(&self, proof_id: &str) -> Result<ProofRecord, ConsentError> {
        read_json(self.state.storage.as_ref(), &keys::proof(proof_id))
            .await?
            .ok_or_else(|| ConsentError::NotFound(format!("Proof {}", proof_id)))
    }

    /// Persist a record and keep the pending index in step with its state.
    async fn store(&self, record: &ProofRecord) -> Result<(), ConsentError> {
        let storage = self.state.storage.as_ref();
        write_json(storage, &keys::proof(&record.proof_id), record).await?;
        let index_key = keys::pending_proof(&record.proof_id);
        if record.state == ProofState::Pending {
            write_json(storage, &index_key, &record.proof_id).await
        } else {
            storage.delete(&index_key).await
        }
    }

    async fn pending_ids(&self) -> Result<Vec<String>, ConsentError> {
        scan_json(self.state.storage.as_ref(), keys::PENDING_PROOF_PREFIX).await
    }

    pub async fn proofs(&self) -> Result<Vec<ProofRecord>, ConsentError> {
        scan_json(self.state.storage.as_ref(), keys::PROOF_PREFIX).await
    }

    /// Anchor a record hash. Returns once the proof is written (synchronous
    /// backends) or durably enqueued (asynchronous backends).
    pub async fn submit_proof(
        &self,
        record_hash: &str,
        citizen_id: Option<&str>,
    ) -> Result<ProofHandle, ConsentError> {
        if record_hash.trim().is_empty() {
            return Err(ConsentError::ValidationError("Record hash is required".to_string()));
        }

        let backend = self.backend().await;
        let mut record = ProofRecord {
            proof_id: Uuid::new_v4().to_string(),
            record_hash: record_hash.to_string(),
            backend_id: backend.backend_id().to_string(),
            proof_handle: None,
            submitted_at: Utc::now(),
            confirmed: false,
            state: ProofState::Queued,
            attempts: 0,
            last_error: None,
            citizen_id: citizen_id.map(str::to_string),
        };

        if backend.is_synchronous() {
            let _guard = self.state.locks.lock(&record.proof_id).await;
            self.attempt_submission(backend.as_ref(), &mut record).await?;
            if record.state == ProofState::Pending {
                record.confirmed = true;
                record.state = ProofState::Confirmed;
                self.store(&record).await?;
            }
            return Ok(record.handle());
        }

        self.store(&record).await?;
        if self.state.queue_tx.send(record.proof_id.clone()).is_err() {
            warn!(
                "Proof queue closed; {} stays queued until the next start",
                record.proof_id
            );
        }
        debug!("Enqueued proof {} for {}", record.proof_id, record.backend_id);
        Ok(record.handle())
    }

    /// Run the retry policy against the backend and persist the outcome:
    /// `Pending` with a handle on success, `Degraded` otherwise.
    async fn attempt_submission(
        &self,
        backend: &dyn LedgerBackend,
        record: &mut ProofRecord,
    ) -> Result<(), ConsentError> {
        let label = format!("{} proof {}", backend.backend_id(), record.proof_id);
        let hash = record.record_hash.clone();

        match self.state.retry.run(&label, || backend.submit_proof(&hash)).await {
            Ok((handle, attempts)) => {
                record.attempts += attempts;
                record.proof_handle = Some(handle);
                record.state = ProofState::Pending;
                record.last_error = None;
                self.store(record).await?;
            }
            Err(exhausted) => {
                record.attempts += exhausted.attempts;
                record.state = ProofState::Degraded;
                record.last_error = Some(exhausted.last_error.to_string());
                self.store(record).await?;

                let failure = ConsentError::ProofSubmissionFailed(format!(
                    "proof {} for {} after {} attempt(s): {}",
                    record.proof_id, record.record_hash, record.attempts, exhausted.last_error
                ));
                error!("{}; marked degraded for operator remediation", failure);
                self.audit_degraded(record).await;
            }
        }
        Ok(())
    }

    async fn audit_degraded(&self, record: &ProofRecord) {
        let (Some(audit), Some(citizen_id)) = (&self.state.audit, &record.citizen_id) else {
            return;
        };
        let payload = json!({
            "proof_id": record.proof_id,
            "record_hash": record.record_hash,
            "backend_id": record.backend_id,
            "attempts": record.attempts,
            "last_error": record.last_error,
        });
        if let Err(e) = audit
            .append(citizen_id, AuditEntryType::ProofDegraded, "provenance-anchor", payload)
            .await
        {
            error!("Failed to audit degraded proof {}: {}", record.proof_id, e);
        }
    }

    /// Flag a record written for a backend that is no longer configured.
    async fn orphan_if_stale(
        &self,
        record: &mut ProofRecord,
        current_backend: &str,
    ) -> Result<bool, ConsentError> {
        if record.backend_id == current_backend || !(record.state.is_in_flight() || record.state == ProofState::Degraded) {
            return Ok(false);
        }
        record.state = ProofState::Orphaned;
        record.last_error = Some(format!(
            "backend switched from {} to {}",
            record.backend_id, current_backend
        ));
        self.store(record).await?;
        warn!(
            "Proof {} orphaned on {} after backend switch",
            record.proof_id, record.backend_id
        );
        Ok(true)
    }

    /// Submission worker step for one queued proof.
    pub(crate) async fn process_submission(&self, proof_id: &str) -> Result<(), ConsentError> {
        let _guard = self.state.locks.lock(proof_id).await;
        let mut record = self.load(proof_id).await?;
        if record.state != ProofState::Queued {
            debug!("Proof {} already {}", proof_id, record.state);
            return Ok(());
        }

        let backend = self.backend().await;
        if self.orphan_if_stale(&mut record, backend.backend_id()).await? {
            return Ok(());
        }

        self.attempt_submission(backend.as_ref(), &mut record).await?;
        if record.state == ProofState::Pending && backend.is_synchronous() {
            record.confirmed = true;
            record.state = ProofState::Confirmed;
            self.store(&record).await?;
        }
        Ok(())
    }

    /// One confirmation pass over pending proofs. Returns how many changed.
    pub async fn poll_pending(&self) -> Result<usize, ConsentError> {
        let backend = self.backend().await;
        let mut changed = 0;
        for proof_id in self.pending_ids().await? {
            let _guard = self.state.locks.lock(&proof_id).await;
            let mut record = self.load(&proof_id).await?;
            if record.state != ProofState::Pending {
                continue;
            }
            if self.orphan_if_stale(&mut record, backend.backend_id()).await? {
                changed += 1;
                continue;
            }
            if self.refresh(backend.as_ref(), &mut record).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Ask the backend about one pending record. Returns true if it changed.
    async fn refresh(
        &self,
        backend: &dyn LedgerBackend,
        record: &mut ProofRecord,
    ) -> Result<bool, ConsentError> {
        let Some(handle) = record.proof_handle.clone() else {
            return Ok(false);
        };

        match self.state.retry.call(backend.poll_status(&handle)).await {
            Ok(ProofStatus::Confirmed) => {
                record.confirmed = true;
                record.state = ProofState::Confirmed;
                self.store(record).await?;
                info!("Proof {} confirmed ({})", record.proof_id, handle);
                Ok(true)
            }
            Ok(ProofStatus::Failed) => {
                record.state = ProofState::Failed;
                record.last_error = Some(format!("backend reported {} failed", handle));
                self.store(record).await?;
                error!("Proof {} failed on {}", record.proof_id, record.backend_id);
                Ok(true)
            }
            Ok(ProofStatus::Pending) => Ok(false),
            Err(e) => {
                debug!("Status poll for {} failed: {}", record.proof_id, e);
                Ok(false)
            }
        }
    }

    /// Current record for a proof, flagging it orphaned if its backend has
    /// been switched away.
    pub async fn poll_status(&self, proof_id: &str) -> Result<ProofRecord, ConsentError> {
        let _guard = self.state.locks.lock(proof_id).await;
        let mut record = self.load(proof_id).await?;
        let backend = self.backend().await;
        self.orphan_if_stale(&mut record, backend.backend_id()).await?;
        Ok(record)
    }

    pub async fn degraded_proofs(&self) -> Result<Vec<ProofRecord>, ConsentError> {
        Ok(self
            .proofs()
            .await?
            .into_iter()
            .filter(|r| r.state == ProofState::Degraded)
            .collect())
    }

    /// Operator remediation: put degraded proofs back on the queue.
    pub async fn retry_degraded(&self) -> Result<usize, ConsentError> {
        let count = self.requeue_where(|r| r.state == ProofState::Degraded).await?;
        info!("Re-enqueued {} degraded proof(s)", count);
        Ok(count)
    }

    async fn requeue_where<F>(&self, select: F) -> Result<usize, ConsentError>
    where
        F: Fn(&ProofRecord) -> bool,
    {
        let current = self.backend_id().await;
        let mut count = 0;
        for record in self.proofs().await?.into_iter().filter(|r| select(r)) {
            let _guard = self.state.locks.lock(&record.proof_id).await;
            let mut record = self.load(&record.proof_id).await?;
            if !select(&record) || self.orphan_if_stale(&mut record, &current).await? {
                continue;
            }
            record.state = ProofState::Queued;
            self.store(&record).await?;
            if self.state.queue_tx.send(record.proof_id.clone()).is_err() {
                warn!("Proof queue closed; {} stays queued", record.proof_id);
            }
            count += 1;
        }
        Ok(count)
    }

    /// Replace the backend. Proofs still in flight on the old backend are
    /// flagged orphaned the next time they are observed.
    pub async fn switch_backend(&self, backend: Arc<dyn LedgerBackend>) -> Result<usize, ConsentError> {
        let new_id = backend.backend_id().to_string();
        let old_id = {
            let mut current = self.state.backend.write().await;
            let old_id = current.backend_id().to_string();
            *current = backend;
            old_id
        };

        let in_flight = self
            .proofs()
            .await?
            .iter()
            .filter(|r| r.backend_id == old_id && r.state.is_in_flight())
            .count();
        warn!(
            "Ledger backend switched from {} to {}; {} in-flight proof(s) will be orphaned",
            old_id, new_id, in_flight
        );
        Ok(in_flight)
    }
}
