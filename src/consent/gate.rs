//! Access Gate
//!
//! Every domain read or write passes through here first. A denial is a
//! normal [`AccessDecision`], never an error, and every decision is audited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{AuditEntryType, AuditTrail};
use crate::consent::grant::DataModule;
use crate::consent::ledger::{validate_pair, ConsentLedger, ConsentLookup};
use crate::consent::policy::{Tier, TierRule};
use crate::error::ConsentError;

pub const REASON_CONSENT_GRANTED: &str = "consent-granted";
pub const REASON_PROOF_CONSENT: &str = "proof-consent-granted";
pub const REASON_REVOKED: &str = "revoked";
pub const REASON_EXPIRED: &str = "expired";
pub const REASON_NO_CONSENT: &str = "no-consent";
pub const REASON_COMMERCIAL_RAW: &str = "commercial-raw-access";
pub const REASON_NO_POLICY: &str = "no-policy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
    Allow,
    Deny,
}

impl fmt::Display for AccessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessOutcome::Allow => f.write_str("allow"),
            AccessOutcome::Deny => f.write_str("deny"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub citizen_id: String,
    pub requester_id: String,
    pub module: DataModule,
    pub tier: Tier,
    pub timestamp: DateTime<Utc>,
    pub outcome: AccessOutcome,
    pub reason: String,
    pub grant_id: Option<String>,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        self.outcome == AccessOutcome::Allow
    }
}

/// Which request path is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessPath {
    Raw,
    Proof,
}

#[derive(Debug)]
pub struct AccessGate {
    ledger: Arc<ConsentLedger>,
    audit: Arc<AuditTrail>,
}

impl AccessGate {
    pub fn new(ledger: Arc<ConsentLedger>, audit: Arc<AuditTrail>) -> Self {
        Self { ledger, audit }
    }

    pub async fn check_access(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: DataModule,
        tier: Tier,
    ) -> Result<AccessDecision, ConsentError> {
        self.check_access_at(citizen_id, requester_id, module, tier, Utc::now())
            .await
    }

    pub async fn check_access_at(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: DataModule,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, ConsentError> {
        self.evaluate(citizen_id, requester_id, module, tier, now, AccessPath::Raw)
            .await
    }

    /// The proof-stub path: the only route by which a proof-only tier may
    /// succeed, and only under consent covering the module.
    pub async fn check_proof_access(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: DataModule,
        tier: Tier,
    ) -> Result<AccessDecision, ConsentError> {
        self.check_proof_access_at(citizen_id, requester_id, module, tier, Utc::now())
            .await
    }

    pub async fn check_proof_access_at(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: DataModule,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, ConsentError> {
        self.evaluate(citizen_id, requester_id, module, tier, now, AccessPath::Proof)
            .await
    }

    async fn evaluate(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: DataModule,
        tier: Tier,
        now: DateTime<Utc>,
        path: AccessPath,
    ) -> Result<AccessDecision, ConsentError> {
        validate_pair(citizen_id, requester_id)?;
        // Held through the audit append so decisions and grant mutations on
        // one pair appear in the trail in the order they happened.
        let _guard = self.ledger.lock_pair(citizen_id, requester_id).await;

        let (outcome, reason, grant_id) = match (self.ledger.policy().rule_for(tier), path) {
            (None, _) => (AccessOutcome::Deny, REASON_NO_POLICY.to_string(), None),
            (Some(TierRule::AlwaysAllow { reason }), _) => (AccessOutcome::Allow, reason.clone(), None),
            (Some(TierRule::RequireConsent), _) => {
                self.consult_ledger(citizen_id, requester_id, module, now, REASON_CONSENT_GRANTED)
                    .await?
            }
            (Some(TierRule::ProofOnly), AccessPath::Raw) => {
                (AccessOutcome::Deny, REASON_COMMERCIAL_RAW.to_string(), None)
            }
            (Some(TierRule::ProofOnly), AccessPath::Proof) => {
                self.consult_ledger(citizen_id, requester_id, module, now, REASON_PROOF_CONSENT)
                    .await?
            }
        };

        let decision = AccessDecision {
            citizen_id: citizen_id.to_string(),
            requester_id: requester_id.to_string(),
            module,
            tier,
            timestamp: now,
            outcome,
            reason,
            grant_id,
        };

        let entry_type = match path {
            AccessPath::Raw => AuditEntryType::AccessDecision,
            AccessPath::Proof => AuditEntryType::ProofAccessDecision,
        };
        self.audit
            .append(
                citizen_id,
                entry_type,
                requester_id,
                json!({
                    "requester_id": decision.requester_id,
                    "module": module,
                    "tier": tier,
                    "outcome": outcome,
                    "reason": decision.reason,
                    "grant_id": decision.grant_id,
                    "decided_at": now.to_rfc3339(),
                }),
            )
            .await?;

        match outcome {
            AccessOutcome::Allow => info!(
                "Access allowed: {} -> {} on {} ({})",
                requester_id, citizen_id, module, decision.reason
            ),
            AccessOutcome::Deny => warn!(
                "Access denied: {} -> {} on {} ({})",
                requester_id, citizen_id, module, decision.reason
            ),
        }
        Ok(decision)
    }

    async fn consult_ledger(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: DataModule,
        now: DateTime<Utc>,
        allow_reason: &str,
    ) -> Result<(AccessOutcome, String, Option<String>), ConsentError> {
        let grants = self.ledger.load_pair(citizen_id, requester_id).await?;
        Ok(match ConsentLedger::lookup(&grants, module, now) {
            ConsentLookup::Active(id) => (AccessOutcome::Allow, allow_reason.to_string(), Some(id)),
            ConsentLookup::Revoked(id) => (AccessOutcome::Deny, REASON_REVOKED.to_string(), Some(id)),
            ConsentLookup::Expired(id) => (AccessOutcome::Deny, REASON_EXPIRED.to_string(), Some(id)),
            ConsentLookup::Absent => (AccessOutcome::Deny, REASON_NO_CONSENT.to_string(), None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::policy::{TierPolicy, GOVERNMENT_ACCESS_REASON};
    use crate::storage::{MemoryStore, Storage};
    use chrono::Duration;

    struct Fixture {
        audit: Arc<AuditTrail>,
        ledger: Arc<ConsentLedger>,
        gate: AccessGate,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditTrail::new(store.clone()));
        let ledger = Arc::new(ConsentLedger::new(
            store,
            audit.clone(),
            Arc::new(TierPolicy::default()),
            365,
        ));
        let gate = AccessGate::new(ledger.clone(), audit.clone());
        Fixture { audit, ledger, gate }
    }

    #[tokio::test]
    async fn test_government_always_allowed() {
        let f = fixture();
        for module in DataModule::ALL {
            let d = f
                .gate
                .check_access("C1", "UIDAI", module, Tier::Government)
                .await
                .unwrap();
            assert!(d.is_allowed());
            assert_eq!(d.reason, GOVERNMENT_ACCESS_REASON);
        }
        assert_eq!(f.audit.entries("C1").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_regulated_requires_consent() {
        let f = fixture();
        let d = f
            .gate
            .check_access("C1", "SBI_BANK", DataModule::Financial, Tier::Regulated)
            .await
            .unwrap();
        assert_eq!(d.outcome, AccessOutcome::Deny);
        assert_eq!(d.reason, REASON_NO_CONSENT);

        let grant = f
            .ledger
            .grant("C1", "SBI_BANK", "SBI", &[DataModule::Financial], 30)
            .await
            .unwrap();
        let d = f
            .gate
            .check_access("C1", "SBI_BANK", DataModule::Financial, Tier::Regulated)
            .await
            .unwrap();
        assert!(d.is_allowed());
        assert_eq!(d.grant_id, Some(grant.grant_id));

        let d = f
            .gate
            .check_access("C1", "SBI_BANK", DataModule::Health, Tier::Regulated)
            .await
            .unwrap();
        assert_eq!(d.reason, REASON_NO_CONSENT);
    }

    #[tokio::test]
    async fn test_thirty_day_grant_expires_without_revoke() {
        let f = fixture();
        let grant = f
            .ledger
            .grant("C1", "APOLLO_HOSPITAL", "Apollo", &[DataModule::Health], 30)
            .await
            .unwrap();
        let boundary = grant.granted_at + Duration::days(30);

        let before = f
            .gate
            .check_access_at(
                "C1",
                "APOLLO_HOSPITAL",
                DataModule::Health,
                Tier::Regulated,
                boundary - Duration::seconds(1),
            )
            .await
            .unwrap();
        assert!(before.is_allowed());

        for at in [boundary, boundary + Duration::days(3)] {
            let d = f
                .gate
                .check_access_at("C1", "APOLLO_HOSPITAL", DataModule::Health, Tier::Regulated, at)
                .await
                .unwrap();
            assert_eq!(d.outcome, AccessOutcome::Deny);
            assert_eq!(d.reason, REASON_EXPIRED);
        }
    }

    #[tokio::test]
    async fn test_commercial_raw_denied_proof_path_needs_consent() {
        let f = fixture();
        f.ledger
            .grant("C1", "ACME_ADS", "Acme", &[DataModule::Financial], 30)
            .await
            .unwrap();

        for module in DataModule::ALL {
            let d = f
                .gate
                .check_access("C1", "ACME_ADS", module, Tier::Commercial)
                .await
                .unwrap();
            assert_eq!(d.reason, REASON_COMMERCIAL_RAW);
        }

        let proof = f
            .gate
            .check_proof_access("C1", "ACME_ADS", DataModule::Financial, Tier::Commercial)
            .await
            .unwrap();
        assert!(proof.is_allowed());
        assert_eq!(proof.reason, REASON_PROOF_CONSENT);

        let proof = f
            .gate
            .check_proof_access("C1", "ACME_ADS", DataModule::Health, Tier::Commercial)
            .await
            .unwrap();
        assert!(!proof.is_allowed());

        let last = f.audit.entries("C1").await.unwrap().pop().unwrap();
        assert_eq!(last.entry_type, AuditEntryType::ProofAccessDecision);
    }

    #[tokio::test]
    async fn test_missing_policy_rule_denies() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditTrail::new(store.clone()));
        let mut policy = TierPolicy::default();
        policy.rules.remove(&Tier::Government);
        let ledger = Arc::new(ConsentLedger::new(store, audit.clone(), Arc::new(policy), 365));
        let gate = AccessGate::new(ledger, audit);

        let d = gate
            .check_access("C1", "UIDAI", DataModule::Identity, Tier::Government)
            .await
            .unwrap();
        assert_eq!(d.reason, REASON_NO_POLICY);
    }

    #[tokio::test]
    async fn test_nested_requester_grant_does_not_leak() {
        let f = fixture();
        assert!(matches!(
            f.ledger
                .grant("C1", "APOLLO_HOSPITAL/LAB", "Apollo Lab", &[DataModule::Health], 30)
                .await,
            Err(ConsentError::ValidationError(_))
        ));

        let d = f
            .gate
            .check_access("C1", "APOLLO_HOSPITAL", DataModule::Health, Tier::Regulated)
            .await
            .unwrap();
        assert!(!d.is_allowed());
        assert_eq!(d.reason, REASON_NO_CONSENT);

        assert!(matches!(
            f.gate
                .check_access("C1", "APOLLO_HOSPITAL/LAB", DataModule::Health, Tier::Regulated)
                .await,
            Err(ConsentError::ValidationError(_))
        ));
        assert!(matches!(
            f.gate
                .check_access("C1/00000000000000000001", "APOLLO_HOSPITAL", DataModule::Health, Tier::Regulated)
                .await,
            Err(ConsentError::ValidationError(_))
        ));
        // Only the single legitimate decision was audited.
        assert_eq!(f.audit.entries("C1").await.unwrap().len(), 1);
    }
}
