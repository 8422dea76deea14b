//! Consent Ledger
//!
//! Issues, revokes and lists consent grants keyed by (citizen, requester,
//! module). Every mutation of a (citizen, requester) pair runs under that
//! pair's lock, which the access gate shares.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditEntryType, AuditTrail};
use crate::consent::grant::{ConsentGrant, DataModule, GrantStatus};
use crate::consent::policy::TierPolicy;
use crate::error::ConsentError;
use crate::locks::{pair_key, KeyedGuard, KeyedLocks};
use crate::storage::{keys, scan_json, validate_key_id, write_json, Storage};

/// Both ids become storage key segments.
pub(crate) fn validate_pair(citizen_id: &str, requester_id: &str) -> Result<(), ConsentError> {
    validate_key_id("Citizen id", citizen_id)?;
    validate_key_id("Requester id", requester_id)
}

/// What the ledger knows about one module for one pair at an instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentLookup {
    Active(String),
    Revoked(String),
    Expired(String),
    Absent,
}

/// Result of a revocation. `reissued` holds the grant carrying the modules
/// left over when one module of a multi-module grant was revoked.
#[derive(Debug, Clone)]
pub struct Revocation {
    pub revoked: Vec<ConsentGrant>,
    pub reissued: Option<ConsentGrant>,
}

#[derive(Debug)]
pub struct ConsentLedger {
    storage: Arc<dyn Storage>,
    audit: Arc<AuditTrail>,
    policy: Arc<TierPolicy>,
    locks: KeyedLocks,
    max_grant_days: i64,
}

impl ConsentLedger {
    pub fn new(
        storage: Arc<dyn Storage>,
        audit: Arc<AuditTrail>,
        policy: Arc<TierPolicy>,
        max_grant_days: i64,
    ) -> Self {
        Self {
            storage,
            audit,
            policy,
            locks: KeyedLocks::new(),
            max_grant_days,
        }
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    pub fn max_grant_days(&self) -> i64 {
        self.max_grant_days
    }

    pub(crate) async fn lock_pair(&self, citizen_id: &str, requester_id: &str) -> KeyedGuard {
        self.locks.lock(&pair_key(citizen_id, requester_id)).await
    }

    /// Grants of one pair, oldest first. Caller should hold the pair lock.
    pub(crate) async fn load_pair(
        &self,
        citizen_id: &str,
        requester_id: &str,
    ) -> Result<Vec<ConsentGrant>, ConsentError> {
        let mut grants: Vec<ConsentGrant> = scan_json(
            self.storage.as_ref(),
            &keys::grants_of_pair(citizen_id, requester_id),
        )
        .await?;
        grants.retain(|g| g.citizen_id == citizen_id && g.requester_id == requester_id);
        grants.sort_by_key(|g| g.granted_at);
        Ok(grants)
    }

    async fn store(&self, grant: &ConsentGrant) -> Result<(), ConsentError> {
        write_json(
            self.storage.as_ref(),
            &keys::grant(&grant.citizen_id, &grant.requester_id, &grant.grant_id),
            grant,
        )
        .await
    }

    /// Write back expiries that have passed since the grants were stored.
    async fn settle_expired(
        &self,
        grants: &mut [ConsentGrant],
        now: DateTime<Utc>,
    ) -> Result<(), ConsentError> {
        for grant in grants.iter_mut() {
            if grant.status == GrantStatus::Active && grant.status_at(now) == GrantStatus::Expired {
                grant.status = GrantStatus::Expired;
                self.store(grant).await?;
                debug!("Grant {} expired at {}", grant.grant_id, grant.expires_at);
            }
        }
        Ok(())
    }

    pub fn lookup(grants: &[ConsentGrant], module: DataModule, now: DateTime<Utc>) -> ConsentLookup {
        if let Some(active) = grants
            .iter()
            .find(|g| g.covers(module) && g.granted_at <= now && g.is_active_at(now))
        {
            return ConsentLookup::Active(active.grant_id.clone());
        }
        match grants
            .iter()
            .filter(|g| g.covers(module) && g.granted_at <= now)
            .max_by_key(|g| g.granted_at)
        {
            Some(latest) => match latest.status_at(now) {
                GrantStatus::Revoked => ConsentLookup::Revoked(latest.grant_id.clone()),
                _ => ConsentLookup::Expired(latest.grant_id.clone()),
            },
            None => ConsentLookup::Absent,
        }
    }

    pub async fn grant(
        &self,
        citizen_id: &str,
        requester_id: &str,
        requester_name: &str,
        modules: &[DataModule],
        duration_days: i64,
    ) -> Result<ConsentGrant, ConsentError> {
        self.grant_at(citizen_id, requester_id, requester_name, modules, duration_days, Utc::now())
            .await
    }

    pub async fn grant_at(
        &self,
        citizen_id: &str,
        requester_id: &str,
        requester_name: &str,
        modules: &[DataModule],
        duration_days: i64,
        now: DateTime<Utc>,
    ) -> Result<ConsentGrant, ConsentError> {
        validate_pair(citizen_id, requester_id)?;
        if modules.is_empty() {
            return Err(ConsentError::InvalidGrant(
                "A grant must cover at least one module".to_string(),
            ));
        }
        if duration_days <= 0 {
            return Err(ConsentError::InvalidGrant(format!(
                "Grant duration must be positive, got {} days",
                duration_days
            )));
        }
        if duration_days > self.max_grant_days {
            return Err(ConsentError::grant_duration_exceeded(
                duration_days,
                self.max_grant_days,
            ));
        }

        let expires_at = TimeDelta::try_days(duration_days)
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or_else(|| {
                ConsentError::ValidationError(format!(
                    "Grant duration of {} days is out of range",
                    duration_days
                ))
            })?;
        let modules: BTreeSet<DataModule> = modules.iter().copied().collect();

        let _guard = self.lock_pair(citizen_id, requester_id).await;
        let mut existing = self.load_pair(citizen_id, requester_id).await?;
        self.settle_expired(&mut existing, now).await?;

        for module in &modules {
            if let ConsentLookup::Active(_) = Self::lookup(&existing, *module, now) {
                return Err(ConsentError::conflicting_grant(
                    citizen_id,
                    requester_id,
                    module.as_str(),
                ));
            }
        }

        let tier = self.policy.classify(requester_id);
        let grant = ConsentGrant {
            grant_id: Uuid::new_v4().to_string(),
            citizen_id: citizen_id.to_string(),
            requester_id: requester_id.to_string(),
            requester_name: requester_name.to_string(),
            tier,
            modules,
            granted_at: now,
            expires_at,
            revoked_at: None,
            status: GrantStatus::Active,
        };
        self.store(&grant).await?;

        self.audit
            .append(
                citizen_id,
                AuditEntryType::GrantIssued,
                citizen_id,
                json!({
                    "grant_id": grant.grant_id,
                    "requester_id": requester_id,
                    "tier": tier,
                    "modules": grant.module_names(),
                    "expires_at": grant.expires_at.to_rfc3339(),
                }),
            )
            .await?;

        info!(
            "Consent granted: {} -> {} ({}) for {:?} until {}",
            citizen_id,
            requester_id,
            tier,
            grant.module_names(),
            grant.expires_at
        );
        Ok(grant)
    }

    pub async fn revoke(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: Option<DataModule>,
    ) -> Result<Revocation, ConsentError> {
        self.revoke_at(citizen_id, requester_id, module, Utc::now()).await
    }

    pub async fn revoke_at(
        &self,
        citizen_id: &str,
        requester_id: &str,
        module: Option<DataModule>,
        now: DateTime<Utc>,
    ) -> Result<Revocation, ConsentError> {
        validate_pair(citizen_id, requester_id)?;
        let _guard = self.lock_pair(citizen_id, requester_id).await;
        let mut grants = self.load_pair(citizen_id, requester_id).await?;
        self.settle_expired(&mut grants, now).await?;

        let mut revoked = Vec::new();
        let mut reissued = None;

        for grant in grants.iter_mut() {
            if !grant.is_active_at(now) {
                continue;
            }
            if let Some(m) = module {
                if !grant.covers(m) {
                    continue;
                }
            }

            grant.status = GrantStatus::Revoked;
            grant.revoked_at = Some(now);
            self.store(grant).await?;

            if let Some(m) = module {
                let remaining: BTreeSet<DataModule> =
                    grant.modules.iter().copied().filter(|x| *x != m).collect();
                if !remaining.is_empty() {
                    let replacement = ConsentGrant {
                        grant_id: Uuid::new_v4().to_string(),
                        modules: remaining,
                        granted_at: now,
                        revoked_at: None,
                        status: GrantStatus::Active,
                        ..grant.clone()
                    };
                    self.store(&replacement).await?;
                    reissued = Some(replacement);
                }
            }
            revoked.push(grant.clone());
        }

        if revoked.is_empty() {
            return Err(ConsentError::NotFound(format!(
                "No active grant from {} to {}{}",
                citizen_id,
                requester_id,
                module.map(|m| format!(" covering '{}'", m)).unwrap_or_default()
            )));
        }

        let revoked_ids: Vec<&str> = revoked.iter().map(|g| g.grant_id.as_str()).collect();
        self.audit
            .append(
                citizen_id,
                AuditEntryType::GrantRevoked,
                citizen_id,
                json!({
                    "grant_ids": revoked_ids,
                    "requester_id": requester_id,
                    "module": module.map(|m| m.as_str()).unwrap_or("all"),
                    "reissued_grant_id": reissued.as_ref().map(|g| g.grant_id.clone()),
                }),
            )
            .await?;

        info!(
            "Consent revoked: {} -> {} ({} grant(s), module {})",
            citizen_id,
            requester_id,
            revoked.len(),
            module.map(|m| m.as_str()).unwrap_or("all")
        );
        Ok(Revocation { revoked, reissued })
    }

    /// All grants of a citizen with their effective status, oldest first.
    pub async fn grants_for(&self, citizen_id: &str) -> Result<Vec<ConsentGrant>, ConsentError> {
        validate_key_id("Citizen id", citizen_id)?;
        let now = Utc::now();
        let mut grants: Vec<ConsentGrant> =
            scan_json(self.storage.as_ref(), &keys::grants_of_citizen(citizen_id)).await?;
        grants.retain(|g| g.citizen_id == citizen_id);
        for grant in grants.iter_mut() {
            grant.status = grant.status_at(now);
        }
        grants.sort_by_key(|g| g.granted_at);
        Ok(grants)
    }
}
