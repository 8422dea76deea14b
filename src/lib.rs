pub mod audit;
pub mod config;
pub mod consent;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod identity;
pub mod locks;
pub mod provenance;
pub mod storage;

pub use engine::{AccessRequest, ConsentEngine, EngineOptions, ProofOutcome, ReadOutcome, WriteOutcome};
pub use error::ConsentError;
