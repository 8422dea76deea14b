#![allow(dead_code)]

use consent_gate::config::CryptoConfig;
use consent_gate::consent::{DataModule, Tier};
use consent_gate::crypto::CryptoEngine;
use consent_gate::identity::{CitizenIdentity, Demographics};
use consent_gate::provenance::{LedgerBackend, RetryPolicy, SimulationLedger};
use consent_gate::storage::{MemoryStore, Storage};
use consent_gate::{AccessRequest, ConsentEngine, EngineOptions};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_NATIONAL_ID: &str = "123456789012";
pub const HOSPITAL: &str = "APOLLO_HOSPITAL";
pub const CREDIT_APP: &str = "CREDIT_SCORE_APP";

/// Crypto setup with a cheap Argon2 cost so tests stay fast
pub fn test_crypto() -> CryptoEngine {
    let mut config = CryptoConfig::new("42".repeat(32), "test-pepper");
    config.biometric_memory_kib = 1024;
    config.biometric_iterations = 1;
    CryptoEngine::new(&config).expect("Failed to create crypto engine")
}

/// Retry bounds tight enough that failing backends degrade within a test
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        call_timeout: Duration::from_millis(500),
    }
}

pub fn test_options() -> EngineOptions {
    EngineOptions {
        retry: fast_retry(),
        poll_interval: Duration::from_millis(20),
        ..EngineOptions::default()
    }
}

/// Engine over an in-memory store and the simulation ledger
pub fn setup_test_engine() -> ConsentEngine {
    setup_engine_with_backend(Arc::new(SimulationLedger::new()))
}

pub fn setup_engine_with_backend(backend: Arc<dyn LedgerBackend>) -> ConsentEngine {
    setup_engine_with(Arc::new(MemoryStore::new()), backend)
}

pub fn setup_engine_with(storage: Arc<dyn Storage>, backend: Arc<dyn LedgerBackend>) -> ConsentEngine {
    ConsentEngine::new(storage, test_crypto(), backend, test_options())
}

pub fn test_demographics() -> Demographics {
    let mut demographics = Demographics::new("Asha Verma", "1990-04-12");
    demographics.gender = Some("F".to_string());
    demographics.address = Some("12 MG Road, Bengaluru".to_string());
    demographics
}

/// Register the default test citizen
pub async fn register_test_citizen(engine: &ConsentEngine) -> CitizenIdentity {
    engine
        .register_citizen(TEST_NATIONAL_ID, &test_demographics(), None)
        .await
        .expect("Failed to register test citizen")
}

pub fn hospital_request(citizen_id: &str) -> AccessRequest {
    AccessRequest::new(citizen_id, HOSPITAL, DataModule::Health, Tier::Regulated)
}

/// Poll until `check` holds or the attempts run out
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
