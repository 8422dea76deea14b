//! Consent lifecycle through the engine: grant, check, revoke, expire

mod common;

use chrono::{Duration, Utc};
use common::*;
use consent_gate::audit::{AuditEntryType, AuditQuery};
use consent_gate::consent::{AccessOutcome, DataModule, GrantStatus, Tier};
use consent_gate::ConsentError;

#[tokio::test]
async fn test_hospital_grant_revoke_scenario() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();

    let grant = engine
        .grant_consent(c, HOSPITAL, "Apollo Hospital", &[DataModule::Health], 30)
        .await
        .unwrap();
    assert_eq!(grant.tier, Tier::Regulated);
    assert_eq!(grant.expires_at - grant.granted_at, Duration::days(30));

    let allowed = engine
        .check_access(c, HOSPITAL, DataModule::Health, Tier::Regulated)
        .await
        .unwrap();
    assert_eq!(allowed.outcome, AccessOutcome::Allow);
    assert_eq!(allowed.grant_id.as_deref(), Some(grant.grant_id.as_str()));

    let revocation = engine.revoke_consent(c, HOSPITAL, None).await.unwrap();
    assert_eq!(revocation.revoked.len(), 1);
    assert!(revocation.reissued.is_none());

    let denied = engine
        .check_access(c, HOSPITAL, DataModule::Health, Tier::Regulated)
        .await
        .unwrap();
    assert_eq!(denied.outcome, AccessOutcome::Deny);
    assert_eq!(denied.reason, "revoked");

    let page = engine.audit_query(c, &AuditQuery::all()).await.unwrap();
    let types: Vec<AuditEntryType> = page.entries.iter().map(|e| e.entry_type).collect();
    assert_eq!(
        types,
        vec![
            AuditEntryType::GrantIssued,
            AuditEntryType::AccessDecision,
            AuditEntryType::GrantRevoked,
            AuditEntryType::AccessDecision,
        ]
    );
    assert_eq!(page.entries[1].payload["outcome"], "allow");
    assert_eq!(page.entries[3].payload["outcome"], "deny");
    assert_eq!(page.entries[3].payload["reason"], "revoked");
    assert!(page.next_cursor.is_none());

    assert!(engine.audit_verify(c).await.unwrap().is_intact());
}

#[tokio::test]
async fn test_grant_expires_after_thirty_days() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();
    let t0 = Utc::now();

    engine
        .ledger()
        .grant_at(c, HOSPITAL, "Apollo Hospital", &[DataModule::Health], 30, t0)
        .await
        .unwrap();

    let day_29 = engine
        .gate()
        .check_access_at(c, HOSPITAL, DataModule::Health, Tier::Regulated, t0 + Duration::days(29))
        .await
        .unwrap();
    assert!(day_29.is_allowed());

    let day_30 = engine
        .gate()
        .check_access_at(c, HOSPITAL, DataModule::Health, Tier::Regulated, t0 + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(day_30.outcome, AccessOutcome::Deny);
    assert_eq!(day_30.reason, "expired");

    // An expired grant no longer blocks a fresh one.
    let renewed = engine
        .ledger()
        .grant_at(c, HOSPITAL, "Apollo Hospital", &[DataModule::Health], 30, t0 + Duration::days(31))
        .await
        .unwrap();
    let grants = engine.ledger().grants_for(c).await.unwrap();
    assert_eq!(grants.len(), 2);
    assert!(grants.iter().any(|g| g.status == GrantStatus::Expired));
    assert!(grants.iter().any(|g| g.grant_id == renewed.grant_id));
}

#[tokio::test]
async fn test_commercial_raw_access_always_denied() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();

    let grant = engine
        .grant_consent(c, CREDIT_APP, "Credit Score App", &[DataModule::Financial], 90)
        .await
        .unwrap();
    assert_eq!(grant.tier, Tier::Commercial);

    let decision = engine
        .check_access(c, CREDIT_APP, DataModule::Financial, Tier::Commercial)
        .await
        .unwrap();
    assert_eq!(decision.outcome, AccessOutcome::Deny);
    assert_eq!(decision.reason, "commercial-raw-access");
}

#[tokio::test]
async fn test_government_access_without_grant() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();

    let decision = engine
        .check_access(c, "UIDAI", DataModule::Identity, Tier::Government)
        .await
        .unwrap();
    assert!(decision.is_allowed());
    assert_eq!(decision.reason, "government-access");

    let page = engine.audit_query(c, &AuditQuery::all()).await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].payload["reason"], "government-access");
}

#[tokio::test]
async fn test_grant_validation_errors() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();

    let empty = engine.grant_consent(c, HOSPITAL, "Apollo", &[], 30).await;
    assert!(matches!(empty, Err(ConsentError::InvalidGrant(_))));

    let zero = engine
        .grant_consent(c, HOSPITAL, "Apollo", &[DataModule::Health], 0)
        .await;
    assert!(matches!(zero, Err(ConsentError::InvalidGrant(_))));

    let too_long = engine
        .grant_consent(c, HOSPITAL, "Apollo", &[DataModule::Health], 366)
        .await;
    assert!(matches!(too_long, Err(ConsentError::ValidationError(_))));

    let unknown = engine
        .grant_consent("no-such-citizen", HOSPITAL, "Apollo", &[DataModule::Health], 30)
        .await;
    assert!(matches!(unknown, Err(ConsentError::NotFound(_))));

    // Nothing was issued, so nothing was audited.
    let page = engine.audit_query(c, &AuditQuery::all()).await.unwrap();
    assert!(page.entries.is_empty());
}

#[tokio::test]
async fn test_overlapping_grant_conflicts() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();

    engine
        .grant_consent(c, HOSPITAL, "Apollo", &[DataModule::Health, DataModule::Identity], 30)
        .await
        .unwrap();

    let overlap = engine
        .grant_consent(c, HOSPITAL, "Apollo", &[DataModule::Identity], 30)
        .await;
    assert!(matches!(overlap, Err(ConsentError::ConflictingGrant(_))));

    // A different module for the same pair is fine.
    engine
        .grant_consent(c, HOSPITAL, "Apollo", &[DataModule::Financial], 30)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_partial_revocation_reissues_remaining_modules() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();

    let original = engine
        .grant_consent(c, HOSPITAL, "Apollo", &[DataModule::Health, DataModule::Identity], 60)
        .await
        .unwrap();

    let revocation = engine
        .revoke_consent(c, HOSPITAL, Some(DataModule::Health))
        .await
        .unwrap();
    let reissued = revocation.reissued.expect("remaining modules re-issued");
    assert!(reissued.covers(DataModule::Identity));
    assert!(!reissued.covers(DataModule::Health));
    assert_eq!(reissued.expires_at, original.expires_at);

    let health = engine
        .check_access(c, HOSPITAL, DataModule::Health, Tier::Regulated)
        .await
        .unwrap();
    assert_eq!(health.reason, "revoked");

    let identity = engine
        .check_access(c, HOSPITAL, DataModule::Identity, Tier::Regulated)
        .await
        .unwrap();
    assert!(identity.is_allowed());
    assert_eq!(identity.grant_id.as_deref(), Some(reissued.grant_id.as_str()));

    let again = engine.revoke_consent(c, HOSPITAL, Some(DataModule::Health)).await;
    assert!(matches!(again, Err(ConsentError::NotFound(_))));
}

#[tokio::test]
async fn test_concurrent_grants_on_one_pair() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        let c = citizen.citizen_id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .grant_consent(&c, HOSPITAL, "Apollo", &[DataModule::Health], 30)
                .await
        }));
    }

    let mut issued = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => issued += 1,
            Err(ConsentError::ConflictingGrant(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(issued, 1);
    assert_eq!(conflicts, 15);

    let grants = engine.ledger().grants_for(&citizen.citizen_id).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert!(engine.audit_verify(&citizen.citizen_id).await.unwrap().is_intact());
}

#[tokio::test]
async fn test_checks_and_revocation_interleave_in_order() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.clone();

    engine
        .grant_consent(&c, HOSPITAL, "Apollo", &[DataModule::Health], 30)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = engine.clone();
        let c = c.clone();
        handles.push(tokio::spawn(async move {
            if i == 5 {
                engine.revoke_consent(&c, HOSPITAL, None).await.map(|_| ())
            } else {
                engine
                    .check_access(&c, HOSPITAL, DataModule::Health, Tier::Regulated)
                    .await
                    .map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Every decision logged after the revocation is a denial.
    let entries = engine.audit().entries(&c).await.unwrap();
    let revoked_at = entries
        .iter()
        .position(|e| e.entry_type == AuditEntryType::GrantRevoked)
        .unwrap();
    for entry in &entries[revoked_at + 1..] {
        assert_eq!(entry.payload["outcome"], "deny");
    }
    for entry in &entries[1..revoked_at] {
        assert_eq!(entry.payload["outcome"], "allow");
    }
    assert!(engine.audit_verify(&c).await.unwrap().is_intact());
}

#[tokio::test]
async fn test_ids_cannot_cross_into_other_key_ranges() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();

    let nested = format!("{}/LAB", HOSPITAL);
    let result = engine
        .grant_consent(c, &nested, "Apollo Lab", &[DataModule::Health], 30)
        .await;
    assert!(matches!(result, Err(ConsentError::ValidationError(_))));

    let decision = engine
        .check_access(c, HOSPITAL, DataModule::Health, Tier::Regulated)
        .await
        .unwrap();
    assert_eq!(decision.outcome, AccessOutcome::Deny);
    assert_eq!(decision.reason, "no-consent");

    let crafted = format!("{}/99999999999999999999", c);
    let result = engine
        .check_access(&crafted, HOSPITAL, DataModule::Health, Tier::Regulated)
        .await;
    assert!(matches!(result, Err(ConsentError::ValidationError(_))));

    let page = engine.audit_query(c, &AuditQuery::all()).await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert!(page.entries.iter().all(|e| e.citizen_id == c));
    assert!(engine.audit_verify(c).await.unwrap().is_intact());
}
