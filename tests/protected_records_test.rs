//! Protected writes, reads and the proof-stub path

mod common;

use common::*;
use consent_gate::audit::{AuditEntryType, AuditQuery};
use consent_gate::consent::{AccessOutcome, DataModule, Tier};
use consent_gate::crypto::verify_zk_proof_stub;
use consent_gate::provenance::ProofState;
use consent_gate::storage::{keys, Storage};
use consent_gate::{AccessRequest, ConsentError, ProofOutcome, ReadOutcome, WriteOutcome};
use std::collections::BTreeMap;

fn lab_result() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("diagnosis".to_string(), "Type 2 diabetes".to_string()),
        ("hba1c".to_string(), "7.9".to_string()),
    ])
}

#[tokio::test]
async fn test_write_then_read_with_consent() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();
    engine
        .grant_consent(c, HOSPITAL, "Apollo Hospital", &[DataModule::Health], 30)
        .await
        .unwrap();

    let request = hospital_request(c);
    let WriteOutcome::Written { record_id, record_hash, proof, .. } =
        engine.protected_write(&request, &lab_result()).await.unwrap()
    else {
        panic!("write should be allowed");
    };
    assert!(record_hash.starts_with("sha256:"));
    assert_eq!(proof.state, ProofState::Confirmed);
    assert!(proof.confirmed);

    let ReadOutcome::Read { fields, .. } = engine.protected_read(&request, &record_id).await.unwrap()
    else {
        panic!("read should be allowed");
    };
    assert_eq!(fields, lab_result());

    let page = engine
        .audit_query(
            c,
            &AuditQuery::all().of_types(&[AuditEntryType::RecordWritten, AuditEntryType::RecordRead]),
        )
        .await
        .unwrap();
    assert_eq!(page.entries.len(), 2);
    assert_eq!(page.entries[0].payload["proof_id"], proof.proof_id.as_str());
    assert_eq!(page.entries[0].payload["record_hash"], record_hash.as_str());
    assert_eq!(page.entries[1].payload["record_id"], record_id.as_str());
}

#[tokio::test]
async fn test_fields_are_encrypted_at_rest() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();
    engine
        .grant_consent(c, HOSPITAL, "Apollo Hospital", &[DataModule::Health], 30)
        .await
        .unwrap();

    let WriteOutcome::Written { record_id, .. } = engine
        .protected_write(&hospital_request(c), &lab_result())
        .await
        .unwrap()
    else {
        panic!("write should be allowed");
    };

    let raw = engine
        .storage()
        .get(&keys::record("health", c, &record_id))
        .await
        .unwrap()
        .expect("record persisted");
    assert!(!raw.contains("diabetes"));
    assert!(!raw.contains("Type 2"));
    assert!(raw.contains("v1."));

    // The national id never reaches storage either.
    for (_, value) in engine.storage().list_by_prefix("").await.unwrap() {
        assert!(!value.contains(TEST_NATIONAL_ID));
    }
}

#[tokio::test]
async fn test_denied_write_persists_nothing() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();
    let proofs_before = engine.anchor().proofs().await.unwrap().len();

    let outcome = engine
        .protected_write(&hospital_request(c), &lab_result())
        .await
        .unwrap();
    let WriteOutcome::Denied(decision) = outcome else {
        panic!("write without consent must be denied");
    };
    assert_eq!(decision.reason, "no-consent");

    let records = engine
        .storage()
        .list_by_prefix(&keys::records_of("health", c))
        .await
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(engine.anchor().proofs().await.unwrap().len(), proofs_before);

    let page = engine.audit_query(c, &AuditQuery::all()).await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].entry_type, AuditEntryType::AccessDecision);
    assert_eq!(page.entries[0].payload["outcome"], "deny");
}

#[tokio::test]
async fn test_read_denied_after_revocation() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();
    engine
        .grant_consent(c, HOSPITAL, "Apollo Hospital", &[DataModule::Health], 30)
        .await
        .unwrap();
    let WriteOutcome::Written { record_id, .. } = engine
        .protected_write(&hospital_request(c), &lab_result())
        .await
        .unwrap()
    else {
        panic!("write should be allowed");
    };

    engine.revoke_consent(c, HOSPITAL, None).await.unwrap();

    let outcome = engine
        .protected_read(&hospital_request(c), &record_id)
        .await
        .unwrap();
    assert!(matches!(outcome, ReadOutcome::Denied(ref d) if d.reason == "revoked"));
}

#[tokio::test]
async fn test_missing_record_and_empty_write() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();
    engine
        .grant_consent(c, HOSPITAL, "Apollo Hospital", &[DataModule::Health], 30)
        .await
        .unwrap();

    let missing = engine.protected_read(&hospital_request(c), "no-such-record").await;
    assert!(matches!(missing, Err(ConsentError::NotFound(_))));

    let empty = engine
        .protected_write(&hospital_request(c), &BTreeMap::new())
        .await;
    assert!(matches!(empty, Err(ConsentError::ValidationError(_))));
}

#[tokio::test]
async fn test_commercial_proof_path_requires_consent() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let c = citizen.citizen_id.as_str();
    let request = AccessRequest::new(c, CREDIT_APP, DataModule::Financial, Tier::Commercial);

    let denied = engine.request_proof(&request, "income > 500000").await.unwrap();
    assert!(matches!(denied, ProofOutcome::Denied(ref d) if d.reason == "no-consent"));

    engine
        .grant_consent(c, CREDIT_APP, "Credit Score App", &[DataModule::Financial], 30)
        .await
        .unwrap();

    let ProofOutcome::Issued { decision, proof } =
        engine.request_proof(&request, "income > 500000").await.unwrap()
    else {
        panic!("proof path should be allowed under consent");
    };
    assert_eq!(decision.outcome, AccessOutcome::Allow);
    assert_eq!(decision.reason, "proof-consent-granted");
    assert_eq!(proof.proof_system, "stub-v1");
    assert!(!proof.sound);
    assert!(verify_zk_proof_stub(&proof, "income > 500000"));
    assert!(!verify_zk_proof_stub(&proof, "income > 100"));

    // The raw path stays closed for the same requester.
    let raw = engine
        .protected_read(&request, "anything")
        .await
        .unwrap();
    assert!(matches!(raw, ReadOutcome::Denied(ref d) if d.reason == "commercial-raw-access"));

    let proof_decisions = engine
        .audit_query(c, &AuditQuery::all().of_types(&[AuditEntryType::ProofAccessDecision]))
        .await
        .unwrap();
    assert_eq!(proof_decisions.entries.len(), 2);
}

#[tokio::test]
async fn test_blank_claim_rejected() {
    let engine = setup_test_engine();
    let citizen = register_test_citizen(&engine).await;
    let request = AccessRequest::new(&citizen.citizen_id, CREDIT_APP, DataModule::Financial, Tier::Commercial);

    let result = engine.request_proof(&request, "  ").await;
    assert!(matches!(result, Err(ConsentError::ValidationError(_))));
}
