//! Provenance Anchor
//!
//! Content hashes are anchored to one of three interchangeable ledger
//! backends, selected once at startup.

pub mod anchor;
pub mod backend;
pub mod chain;
pub mod permissioned;
pub mod retry;
pub mod simulation;

pub use anchor::{AnchorWorkers, ProofHandle, ProofRecord, ProofState, ProvenanceAnchor};
pub use backend::{BackendError, LedgerBackend, ProofStatus};
pub use chain::ChainLedger;
pub use permissioned::PermissionedLedger;
pub use retry::RetryPolicy;
pub use simulation::SimulationLedger;

use std::sync::Arc;
use tracing::info;

use crate::config::{LedgerBackendKind, LedgerConfig};

pub fn backend_from_config(config: &LedgerConfig) -> Arc<dyn LedgerBackend> {
    let backend: Arc<dyn LedgerBackend> = match config.backend {
        LedgerBackendKind::Simulation => Arc::new(SimulationLedger::new()),
        LedgerBackendKind::Chain => Arc::new(ChainLedger::new(&config.chain)),
        LedgerBackendKind::Permissioned => Arc::new(PermissionedLedger::new(&config.fabric)),
    };
    info!("Using {} ledger backend", backend.backend_id());
    backend
}
